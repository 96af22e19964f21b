//! Retry, backoff, rate-limiting and gRPC status-classification primitives.
//!
//! This crate is the leaf layer (components A, B, C of the engine design):
//! it has no knowledge of documents, batches or transactions. The `firestore-core`
//! crate builds the bulk-write engine, transaction runner and streaming query
//! executor on top of these primitives.

pub mod backoff;
pub mod cancel;
pub mod rate_limiter;
pub mod status;

pub use backoff::{BackoffConfig, BackoffError, ExponentialBackoff};
pub use cancel::CancellationToken;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use status::{classify, Classification, Code, RpcStatus};
