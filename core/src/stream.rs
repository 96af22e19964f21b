//! The streaming query executor (§4.4, component D).
//!
//! Grounded on the teacher's `RowIterator` (`reader.rs`): a stream that, on a
//! mid-stream error, reopens the underlying RPC from a cursor built out of
//! the last delivered row rather than surfacing the error to the caller.

use futures::StreamExt;
use tokio::time::Instant;

use firestore_gax::status::MethodRetryPolicy;
use firestore_gax::{classify, CancellationToken, Classification};

use crate::config::StreamConfig;
use crate::error::Error;
use crate::rpc::{DocumentSnapshot, ElementStream, QueryDescriptor, RpcSender, RunQueryRequest, StreamElement, TransactionToken};
use crate::value::Timestamp;

fn query_policy() -> MethodRetryPolicy {
    MethodRetryPolicy::default()
}

/// Whether the stream must observe a single, pinned point in time across
/// retries (transactional reads) or may re-pin to whatever the backend
/// returns on reopen (a standalone, non-transactional query).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    /// Pin to the read-time observed on the first successful response and
    /// require every later response to match it (§4.4 step 3).
    Pinned,
    /// Accept whatever read-time the backend reports on each (re)open.
    Fresh,
}

/// A single query execution, possibly spanning several underlying RPC
/// streams due to mid-stream retries (§4.4).
///
/// `limit_to_last` queries cannot be delivered incrementally (§4.4's ordering
/// guarantee: the last N results are only knowable once the whole result set
/// has been seen), so [`QueryStream::open`] rejects them with
/// [`Error::LimitToLastRequiresBuffering`]; use [`run_query_buffered`] instead.
pub struct QueryStream {
    rpc: std::sync::Arc<dyn RpcSender>,
    database: String,
    collection: String,
    transaction: Option<TransactionToken>,
    consistency: Consistency,
    config: StreamConfig,
    last_delivered: Option<DocumentSnapshot>,
    pinned_read_time: Option<Timestamp>,
    inner: Option<ElementStream>,
    deadline: Instant,
    done: bool,
    /// Whether this stream's wire requests should themselves carry
    /// `limit_to_last: true` — only ever set for the internal stream backing
    /// [`run_query_buffered`], never for a publicly opened stream (§4.4's
    /// incompatibility note: a caller-facing stream can't deliver a
    /// limit-to-last query incrementally).
    wire_limit_to_last: bool,
    /// An explain-mode query (§4.4 step 3): any stream error fails the query
    /// immediately rather than retrying from cursor, since re-running a plan
    /// explain would report metrics for a different execution.
    is_explain: bool,
    cancel: Option<CancellationToken>,
}

impl QueryStream {
    pub async fn open(
        rpc: std::sync::Arc<dyn RpcSender>,
        database: impl Into<String>,
        collection: impl Into<String>,
        transaction: Option<TransactionToken>,
        consistency: Consistency,
        limit_to_last: bool,
        is_explain: bool,
        config: StreamConfig,
    ) -> Result<Self, Error> {
        if limit_to_last {
            return Err(Error::LimitToLastRequiresBuffering);
        }
        Self::open_internal(rpc, database, collection, transaction, consistency, false, is_explain, config).await
    }

    async fn open_internal(
        rpc: std::sync::Arc<dyn RpcSender>,
        database: impl Into<String>,
        collection: impl Into<String>,
        transaction: Option<TransactionToken>,
        consistency: Consistency,
        wire_limit_to_last: bool,
        is_explain: bool,
        config: StreamConfig,
    ) -> Result<Self, Error> {
        let config = config.validate()?;
        let mut stream = Self {
            rpc,
            database: database.into(),
            collection: collection.into(),
            transaction,
            consistency,
            config,
            last_delivered: None,
            pinned_read_time: None,
            inner: None,
            deadline: Instant::now() + config.total_timeout,
            done: false,
            wire_limit_to_last,
            is_explain,
            cancel: None,
        };
        stream.reopen(false).await?;
        Ok(stream)
    }

    /// Gates further polling on `token` (§5: "every long-running operation
    /// accepts a cancellation signal"). A cancelled stream fails its next
    /// `next()` call with `Error::Cancelled` instead of reopening or
    /// returning more documents.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn descriptor(&self, limit_to_last: bool) -> QueryDescriptor {
        QueryDescriptor {
            database: self.database.clone(),
            collection: self.collection.clone(),
            start_after: self.last_delivered.clone(),
            limit_to_last,
        }
    }

    async fn reopen(&mut self, is_retry: bool) -> Result<(), Error> {
        if is_retry && Instant::now() >= self.deadline {
            return Err(Error::RetriesExhausted {
                attempts: 0,
                last: firestore_gax::RpcStatus::new(firestore_gax::Code::DeadlineExceeded, "stream total timeout exceeded"),
            });
        }
        let request_tag = crate::model::next_request_tag("run_query");
        let request = RunQueryRequest {
            database: self.database.clone(),
            query: self.descriptor(self.wire_limit_to_last),
            transaction: self.transaction.clone(),
            read_time: if self.consistency == Consistency::Pinned { self.pinned_read_time.clone() } else { None },
        };
        let stream = self
            .rpc
            .run_query(request, &request_tag)
            .await
            .map_err(Error::Permanent)?;
        self.inner = Some(stream);
        Ok(())
    }

    /// Pulls the next document, transparently reopening the underlying stream
    /// on a retryable mid-stream error (§4.4 steps 2-3). Returns `None` once
    /// the backend signals `Done` or a permanent error after the retry budget
    /// has been spent.
    pub async fn next(&mut self) -> Option<Result<DocumentSnapshot, Error>> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                self.done = true;
                return Some(Err(Error::Cancelled));
            }
            let Some(inner) = self.inner.as_mut() else {
                return Some(Err(Error::StreamConsistencyViolation("stream polled without an open RPC".into())));
            };
            match inner.next().await {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(StreamElement::Done)) => {
                    self.done = true;
                    return None;
                }
                Some(Ok(StreamElement::ReadTime(rt))) => {
                    if self.consistency == Consistency::Pinned && self.pinned_read_time.is_none() {
                        self.pinned_read_time = Some(rt);
                    }
                    continue;
                }
                Some(Ok(StreamElement::Transaction(_))) => continue,
                Some(Ok(StreamElement::ExplainMetrics(_))) => continue,
                Some(Ok(StreamElement::Document(doc))) => {
                    if self.consistency == Consistency::Pinned {
                        if let Some(pinned) = &self.pinned_read_time {
                            if *pinned != doc.read_time {
                                self.done = true;
                                return Some(Err(Error::StreamConsistencyViolation(format!(
                                    "document {} read at {:?}, expected pinned read-time {:?}",
                                    doc.path, doc.read_time, pinned
                                ))));
                            }
                        } else {
                            self.pinned_read_time = Some(doc.read_time.clone());
                        }
                    }
                    self.last_delivered = Some(doc.clone());
                    return Some(Ok(doc));
                }
                Some(Err(status)) => {
                    if self.transaction.is_some() || self.is_explain {
                        // §4.4: in-transaction reads and explain queries never
                        // retry; the caller (or transaction runner) decides.
                        self.done = true;
                        return Some(Err(Error::Permanent(status)));
                    }
                    let classification = classify(&status, &query_policy(), true);
                    if !classification.is_retryable() || matches!(classification, Classification::Permanent) {
                        self.done = true;
                        return Some(Err(Error::Permanent(status)));
                    }
                    tracing::debug!(code = ?status.code, "query stream error, reopening from cursor");
                    if let Err(e) = self.reopen(true).await {
                        self.done = true;
                        return Some(Err(e));
                    }
                    continue;
                }
            }
        }
    }
}

/// Runs a `limit_to_last` query by buffering the whole retried stream before
/// returning (§4.4's incompatibility note): the engine still retries
/// mid-stream, but the caller only sees the final, correctly-ordered slice.
pub async fn run_query_buffered(
    rpc: std::sync::Arc<dyn RpcSender>,
    database: impl Into<String>,
    collection: impl Into<String>,
    limit: usize,
    config: StreamConfig,
) -> Result<Vec<DocumentSnapshot>, Error> {
    let mut stream = QueryStream::open_internal(rpc, database, collection, None, Consistency::Fresh, true, false, config).await?;
    let mut buffer: std::collections::VecDeque<DocumentSnapshot> = std::collections::VecDeque::new();
    while let Some(doc) = stream.next().await {
        let doc = doc?;
        if buffer.len() == limit {
            buffer.pop_front();
        }
        buffer.push_back(doc);
    }
    // The backend returns limit-to-last rows in reverse order; re-reverse
    // before handing the trailing window back to the caller (§4.4).
    let mut result: Vec<DocumentSnapshot> = buffer.into_iter().collect();
    result.reverse();
    Ok(result)
}
