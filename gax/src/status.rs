use std::fmt::{self, Display, Formatter};

/// gRPC status codes, matching the [standard gRPC status codes].
///
/// [standard gRPC status codes]: https://github.com/grpc/grpc/blob/master/doc/statuscodes.md
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A status value reported by the RPC layer (§6 `RpcSender` contract).
///
/// The engine treats this as the only window it has into RPC outcomes; the
/// message is retained for diagnostics but never parsed for control flow.
#[derive(Clone, Debug)]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for RpcStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcStatus {}

/// The logical outcome bucket the error classifier (§4.3) assigns a status to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Classification {
    /// Safe to retry within a `readStream`/`readWriteStream` by reopening the stream.
    RetryableStream,
    /// Safe to retry by reissuing the unary RPC.
    RetryableRpc,
    /// RESOURCE_EXHAUSTED: retryable, but the caller should back off to the
    /// rate limiter's maximum delay rather than the usual exponential schedule.
    RateLimited,
    /// ABORTED: retryable only for methods that opt in (commit, batch-write).
    Aborted,
    /// Not retryable; propagate to the caller.
    Permanent,
}

impl Classification {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Classification::Permanent)
    }
}

/// Per-method retry-code sets, as provided by the external RPC layer (§6).
/// The classifier combines these with the fixed additions named in §4.3.
#[derive(Clone, Debug)]
pub struct MethodRetryPolicy {
    /// Method accepts ABORTED as retryable (commit, batch-write).
    pub retry_aborted: bool,
    /// Codes the RPC layer treats as transient for this method.
    pub stream_retry_codes: &'static [Code],
}

impl Default for MethodRetryPolicy {
    fn default() -> Self {
        Self {
            retry_aborted: false,
            stream_retry_codes: &[Code::Unavailable, Code::Internal, Code::Cancelled, Code::Unknown],
        }
    }
}

/// Classifies a status for a given method per §4.3.
///
/// `is_stream` distinguishes a mid-stream error (restart via cursor, §4.4) from
/// a unary RPC error (plain retry, §4.6.3 step 3-4).
pub fn classify(status: &RpcStatus, policy: &MethodRetryPolicy, is_stream: bool) -> Classification {
    match status.code {
        Code::ResourceExhausted => Classification::RateLimited,
        Code::Aborted if policy.retry_aborted => Classification::Aborted,
        Code::Aborted => Classification::Permanent,
        // A violated precondition is never retryable: a retried `create`
        // must not silently re-succeed against a document that now exists
        // (§8's idempotence law).
        Code::FailedPrecondition => Classification::Permanent,
        code if policy.stream_retry_codes.contains(&code) => {
            if is_stream {
                Classification::RetryableStream
            } else {
                Classification::RetryableRpc
            }
        }
        _ => Classification::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_is_rate_limited_regardless_of_policy() {
        let status = RpcStatus::new(Code::ResourceExhausted, "quota");
        let policy = MethodRetryPolicy {
            retry_aborted: false,
            stream_retry_codes: &[],
        };
        assert_eq!(classify(&status, &policy, false), Classification::RateLimited);
    }

    #[test]
    fn aborted_retryable_only_when_policy_opts_in() {
        let status = RpcStatus::new(Code::Aborted, "txn conflict");
        let commit_policy = MethodRetryPolicy {
            retry_aborted: true,
            ..MethodRetryPolicy::default()
        };
        assert_eq!(classify(&status, &commit_policy, false), Classification::Aborted);

        let query_policy = MethodRetryPolicy::default();
        assert_eq!(classify(&status, &query_policy, false), Classification::Permanent);
    }

    #[test]
    fn unavailable_is_retryable_stream_only_for_streams() {
        let status = RpcStatus::new(Code::Unavailable, "connection reset");
        let policy = MethodRetryPolicy::default();
        assert_eq!(classify(&status, &policy, true), Classification::RetryableStream);
        assert_eq!(classify(&status, &policy, false), Classification::RetryableRpc);
    }

    #[test]
    fn permission_denied_is_permanent() {
        let status = RpcStatus::new(Code::PermissionDenied, "no access");
        let policy = MethodRetryPolicy::default();
        assert_eq!(classify(&status, &policy, false), Classification::Permanent);
    }

    #[test]
    fn failed_precondition_is_permanent_regardless_of_policy() {
        let status = RpcStatus::new(Code::FailedPrecondition, "document already exists");
        let policy = MethodRetryPolicy {
            retry_aborted: true,
            stream_retry_codes: &[Code::FailedPrecondition],
        };
        assert_eq!(classify(&status, &policy, false), Classification::Permanent);
        assert_eq!(classify(&status, &policy, true), Classification::Permanent);
    }
}
