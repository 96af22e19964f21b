use firestore_gax::Code;

/// The crate-wide error taxonomy (§7). Every member carries exactly the
/// fields that the spec calls for so callers can act on a failure instead of
/// pattern-matching on a message string.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// §7.1: user input failed validation; always surfaced synchronously.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// §7.2: operation submitted to a closed bulk writer.
    #[error("the bulk writer is closed")]
    Closed,

    /// §7.3: a transaction read was attempted after a write had been buffered.
    #[error("reads are not allowed after writes have been buffered in this transaction")]
    ReadsAfterWrites,

    /// §7.4: the caller's cancellation signal fired before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// §7.5: a gRPC status outside the method's retry set.
    #[error("permanent backend error: {0}")]
    Permanent(#[from] firestore_gax::RpcStatus),

    /// §7.6: retries were exhausted without success.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: firestore_gax::RpcStatus,
    },

    /// §7.7: a bulk-write per-operation failure, as reported on the
    /// individual result handle (not fanned out to the whole batch).
    #[error("write failed for {path} ({kind:?}) after {attempts} attempt(s): {code:?}")]
    BulkWritePerOp {
        kind: crate::model::MutationKind,
        path: String,
        attempts: u32,
        code: Code,
    },

    /// §7.8: an error raised by a user-registered `on_result`/`on_error` hook.
    #[error("user callback error: {0}")]
    UserCallback(String),

    /// §7.9: the stream executor observed a document whose path or read-time
    /// contradicted its own cursor/consistency invariants.
    #[error("stream consistency violation: {0}")]
    StreamConsistencyViolation(String),

    /// §4.5: the transaction runner's user callback did not resolve its
    /// completion signal (it returned without producing a result).
    #[error("user callback did not produce a completion result")]
    CallbackDidNotReturnResult,

    /// §4.4: a limit-to-last query was requested in streaming mode, which is
    /// incompatible per §4.4's ordering guarantee paragraph.
    #[error("limit-to-last queries cannot be streamed to the caller")]
    LimitToLastRequiresBuffering,
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
