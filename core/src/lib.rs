#![allow(clippy::result_large_err)]
//! # firestore-core
//!
//! Client-side engine for a document-database SDK: a bulk-write engine
//! (batching, throttling, per-operation retry), a transaction runner
//! (begin/callback/commit with retry on ABORTED) and a streaming query
//! executor (mid-stream retry via cursor).
//!
//! This crate deliberately stops at the RPC boundary: channel construction,
//! authentication and wire (de)serialization are out of scope and expressed
//! as the [`rpc::RpcSender`] trait, which a transport crate is expected to
//! implement.
//!
//! ## Quickstart
//!
//! ```ignore
//! use std::sync::Arc;
//! use firestore_core::bulk_writer::BulkWriter;
//! use firestore_core::config::BulkWriterConfig;
//! use firestore_core::path::DocumentPath;
//!
//! async fn run(rpc: Arc<dyn firestore_core::rpc::RpcSender>) -> Result<(), firestore_core::error::Error> {
//!     let writer = BulkWriter::new("projects/p/databases/(default)", rpc, BulkWriterConfig::default())?;
//!     let path = DocumentPath::parse("users/alice")?;
//!     writer.set(path, Default::default()).await?;
//!     writer.close().await;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod bulk_writer;
pub mod config;
pub mod error;
pub mod model;
pub mod path;
pub mod rpc;
pub mod stream;
pub mod transaction;
pub mod transaction_runner;
pub mod value;

pub use bulk_writer::BulkWriter;
pub use error::Error;
pub use path::{CollectionPath, DocumentPath};
pub use rpc::RpcSender;
pub use stream::{Consistency, QueryStream};
pub use transaction::Transaction;
pub use transaction_runner::TransactionRunner;
pub use value::Value;
