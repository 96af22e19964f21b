//! The bulk-write engine (§4.6, component F): the largest subsystem in this
//! crate. Modeled as a small actor (§9 design note) owning the batch queue,
//! the rate limiter and per-operation backoff state behind one exclusive
//! region (§5), reacting to three events — submit, timer-fires, rpc-response
//! — and emitting one: send-batch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use firestore_gax::status::MethodRetryPolicy;
use firestore_gax::{BackoffConfig, CancellationToken, Classification, Code, ExponentialBackoff, RateLimiter, RateLimiterConfig};
use tokio::sync::{oneshot, Mutex, Notify};

use crate::batch::{Batch, BatchId, BatchState};
use crate::config::{BulkWriterConfig, Throttling};
use crate::error::Error;
use crate::model::{MutationKind, Payload, Precondition, WriteOperation, WriteResult};
use crate::path::DocumentPath;
use crate::rpc::{BatchWriteRequest, RpcSender, WriteEntry};
use crate::value::{Timestamp, Value};

/// §4.6.5: the record passed to a registered `on_error` hook.
#[derive(Clone, Debug)]
pub struct OpErrorEvent {
    pub kind: MutationKind,
    pub path: String,
    pub attempts: u32,
    pub code: Code,
}

type OnResultHook = Box<dyn Fn(&str, &WriteResult) + Send + Sync>;
/// Returns `true` to retry the operation (subject to the attempt cap).
type OnErrorHook = Box<dyn Fn(&OpErrorEvent) -> bool + Send + Sync>;

fn batch_write_policy() -> MethodRetryPolicy {
    MethodRetryPolicy {
        retry_aborted: true,
        ..Default::default()
    }
}

struct Inner {
    config: BulkWriterConfig,
    queue: VecDeque<Batch>,
    pending_buffer: VecDeque<WriteOperation>,
    next_batch_id: u64,
    rate_limiter: RateLimiter,
    retry_backoffs: HashMap<u64, ExponentialBackoff>,
    closed: bool,
    live: HashSet<u64>,
    on_result: Option<OnResultHook>,
    on_error: Option<OnErrorHook>,
}

impl Inner {
    fn total_pending(&self) -> usize {
        self.queue.iter().map(Batch::len).sum::<usize>() + self.pending_buffer.len()
    }

    fn push_new_batch(&mut self, is_retry: bool) -> BatchId {
        let id = BatchId(self.next_batch_id);
        self.next_batch_id += 1;
        let max = if is_retry {
            self.config.max_retry_batch_size
        } else {
            self.config.max_batch_size
        };
        self.queue.push_back(Batch::new(id, max, is_retry));
        id
    }

    /// An operation's user-visible outcome has been resolved (success or
    /// final failure): it's no longer live for `flush()`'s purposes, and any
    /// per-operation backoff state it held can be dropped.
    fn retire(&mut self, op_id: u64) {
        self.live.remove(&op_id);
        self.retry_backoffs.remove(&op_id);
    }
}

/// Throughput-oriented bulk writer (§4.6.1 contract).
pub struct BulkWriter {
    inner: Arc<Mutex<Inner>>,
    database: String,
    wake: Arc<Notify>,
    dispatcher: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl Drop for BulkWriter {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl BulkWriter {
    pub fn new(database: impl Into<String>, rpc: Arc<dyn RpcSender>, config: BulkWriterConfig) -> Result<Self, Error> {
        Self::new_with_cancellation(database, rpc, config, CancellationToken::new())
    }

    /// Like [`BulkWriter::new`], but `token` gates the dispatch loop and new
    /// submissions (§5: "every long-running operation accepts a cancellation
    /// signal"). Cancelling it stops dispatching further batches and fails
    /// subsequent `create`/`set`/`update`/`delete` calls with
    /// `Error::Cancelled`; a batch already sent still runs to completion.
    pub fn new_with_cancellation(
        database: impl Into<String>,
        rpc: Arc<dyn RpcSender>,
        config: BulkWriterConfig,
        cancel: CancellationToken,
    ) -> Result<Self, Error> {
        let config = config.validate()?;
        let rate_limiter = match config.throttling {
            Throttling::Disabled => RateLimiter::unbounded(),
            Throttling::Defaults => RateLimiter::new(RateLimiterConfig::default()),
            Throttling::Custom {
                initial_ops_per_second,
                max_ops_per_second,
            } => RateLimiter::new(RateLimiterConfig {
                initial_ops_per_second: initial_ops_per_second as f64,
                max_ops_per_second: Some(max_ops_per_second as f64),
                ..RateLimiterConfig::default()
            }),
        };

        let inner = Arc::new(Mutex::new(Inner {
            config,
            queue: VecDeque::new(),
            pending_buffer: VecDeque::new(),
            next_batch_id: 0,
            rate_limiter,
            retry_backoffs: HashMap::new(),
            closed: false,
            live: HashSet::new(),
            on_result: None,
            on_error: None,
        }));
        let wake = Arc::new(Notify::new());
        let database = database.into();

        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&inner),
            rpc,
            database.clone(),
            Arc::clone(&wake),
            cancel.clone(),
        ));

        Ok(Self {
            inner,
            database,
            wake,
            dispatcher,
            cancel,
        })
    }

    /// A clone of this writer's cancellation token, for callers that did not
    /// retain the one passed to `new_with_cancellation`.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn on_result(&self, hook: impl Fn(&str, &WriteResult) + Send + Sync + 'static) {
        self.inner.lock().await.on_result = Some(Box::new(hook));
    }

    pub async fn on_error(&self, hook: impl Fn(&OpErrorEvent) -> bool + Send + Sync + 'static) {
        self.inner.lock().await.on_error = Some(Box::new(hook));
    }

    async fn submit(
        &self,
        path: DocumentPath,
        kind: MutationKind,
        payload: Payload,
        precondition: Option<Precondition>,
    ) -> Result<oneshot::Receiver<Result<WriteResult, Error>>, Error> {
        if let Payload::Fields(ref fields) | Payload::FieldPaths(ref fields) = payload {
            for v in fields.values() {
                v.validate()?;
            }
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let (op, rx) = WriteOperation::new(path, kind, payload, precondition);

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.live.insert(op.id);
        let _ = admit(&mut inner, op, false);
        drop(inner);
        self.wake.notify_one();
        Ok(rx)
    }

    pub async fn create(
        &self,
        path: DocumentPath,
        fields: std::collections::BTreeMap<String, Value>,
    ) -> Result<oneshot::Receiver<Result<WriteResult, Error>>, Error> {
        self.submit(path, MutationKind::Create, Payload::Fields(fields), Some(Precondition::MustNotExist))
            .await
    }

    pub async fn set(
        &self,
        path: DocumentPath,
        fields: std::collections::BTreeMap<String, Value>,
    ) -> Result<oneshot::Receiver<Result<WriteResult, Error>>, Error> {
        self.submit(path, MutationKind::Set, Payload::Fields(fields), None).await
    }

    pub async fn update(
        &self,
        path: DocumentPath,
        field_paths: std::collections::BTreeMap<String, Value>,
    ) -> Result<oneshot::Receiver<Result<WriteResult, Error>>, Error> {
        self.submit(path, MutationKind::Update, Payload::FieldPaths(field_paths), Some(Precondition::MustExist))
            .await
    }

    pub async fn delete(&self, path: DocumentPath) -> Result<oneshot::Receiver<Result<WriteResult, Error>>, Error> {
        self.submit(path, MutationKind::Delete, Payload::None, None).await
    }

    /// §4.6.1: completes when all operations submitted before this call have
    /// resolved or exceeded retries. Does not wait on operations submitted
    /// after the call returns its snapshot.
    pub async fn flush(&self) {
        let watermark: Vec<u64> = {
            let inner = self.inner.lock().await;
            inner.live.iter().copied().collect()
        };
        loop {
            {
                let inner = self.inner.lock().await;
                if watermark.iter().all(|id| !inner.live.contains(id)) {
                    return;
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// §4.6.1: flush, then refuse subsequent submissions.
    pub async fn close(&self) {
        self.flush().await;
        self.inner.lock().await.closed = true;
    }
}

/// §4.6.2: admits an operation into the queue (or the pending buffer if
/// `P_max` would be exceeded), creating/marking batches as needed. Returns
/// the id of the batch the operation actually landed in, or `None` if it was
/// deferred to `pending_buffer` — callers that need to act on the landing
/// batch (e.g. raising its delay floor) must use this return value rather
/// than assume the tail of `queue`.
fn admit(inner: &mut Inner, op: WriteOperation, is_retry: bool) -> Option<BatchId> {
    if inner.total_pending() >= inner.config.max_pending_ops {
        inner.pending_buffer.push_back(op);
        return None;
    }

    let tail_is_suitable = inner.queue.back().is_some_and(|tail| {
        tail.state == BatchState::Open && tail.is_retry_batch == is_retry && !tail.contains_path(op.path.as_str()) && !tail.is_full()
    });

    if tail_is_suitable {
        let tail = inner.queue.back_mut().unwrap();
        let id = tail.id;
        let _ = tail.try_push(op);
        if tail.is_full() {
            tail.mark_ready();
        }
        return Some(id);
    }

    if let Some(tail) = inner.queue.back_mut() {
        if tail.contains_path(op.path.as_str()) {
            tracing::warn!(path = %op.path, "multiple writes queued for the same document in rapid succession");
        }
        if tail.state == BatchState::Open {
            tail.mark_ready();
        }
    }

    let new_id = inner.push_new_batch(is_retry);
    let batch = inner.queue.iter_mut().rev().find(|b| b.id == new_id).unwrap();
    let _ = batch.try_push(op);
    if batch.is_full() {
        batch.mark_ready();
    }
    Some(new_id)
}

async fn dispatch_loop(inner: Arc<Mutex<Inner>>, rpc: Arc<dyn RpcSender>, database: String, wake: Arc<Notify>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let mut dispatched_any = false;
        loop {
            let candidate = {
                let guard = inner.lock().await;
                find_next_dispatchable(&guard)
            };
            let Some(batch_id) = candidate else { break };

            let (wait, n) = {
                let mut guard = inner.lock().await;
                let batch = guard.queue.iter().find(|b| b.id == batch_id);
                let n = batch.map(Batch::len).unwrap_or(0) as f64;
                let floor = batch.map(Batch::delay_floor).unwrap_or_default();
                let rate_wait = guard.rate_limiter.wait_for(n);
                (rate_wait.max(floor), n)
            };
            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }

            let ops = {
                let mut guard = inner.lock().await;
                guard.rate_limiter.try_acquire(n);
                guard.queue.iter_mut().find(|b| b.id == batch_id).map(|batch| {
                    batch.mark_sent();
                    batch.take_operations()
                })
            };
            let Some(ops) = ops else { continue };
            dispatched_any = true;

            let inner2 = Arc::clone(&inner);
            let rpc2 = Arc::clone(&rpc);
            let database2 = database.clone();
            let wake2 = Arc::clone(&wake);
            tokio::spawn(async move {
                send_batch(inner2, rpc2, database2, batch_id, ops).await;
                wake2.notify_waiters();
            });
        }
        if !dispatched_any {
            tokio::select! {
                _ = wake.notified() => {}
                _ = cancel.cancelled() => return,
            }
        }
    }
}

/// §4.6.3 step 1: a `ReadyToSend` batch is dispatchable unless an earlier,
/// still in-flight (`Sent`) batch references one of the same document paths.
fn find_next_dispatchable(guard: &Inner) -> Option<BatchId> {
    let mut sent_paths: HashSet<&str> = HashSet::new();
    for batch in &guard.queue {
        match batch.state {
            BatchState::Sent => {
                for op in batch.operations() {
                    sent_paths.insert(op.path.as_str());
                }
            }
            BatchState::ReadyToSend => {
                let blocked = batch.operations().iter().any(|op| sent_paths.contains(op.path.as_str()));
                if !blocked {
                    return Some(batch.id);
                }
            }
            _ => {}
        }
    }
    None
}

async fn send_batch(inner: Arc<Mutex<Inner>>, rpc: Arc<dyn RpcSender>, database: String, batch_id: BatchId, mut ops: Vec<WriteOperation>) {
    let request_tag = crate::model::next_request_tag("batch_write");
    let writes: Vec<WriteEntry> = ops
        .iter()
        .map(|op| WriteEntry {
            path: op.path.clone(),
            kind: op.kind,
            payload: op.payload.clone(),
            precondition: op.precondition.clone(),
        })
        .collect();

    let response = rpc.batch_write(BatchWriteRequest { database: database.clone(), writes }, &request_tag, true).await;

    match response {
        Err(status) => {
            // §4.6.3 step 4: an RPC-level failure (not a per-operation status)
            // fans out to every operation in the batch as a permanent error.
            let mut guard = inner.lock().await;
            for mut op in ops.drain(..) {
                op.resolve(Err(Error::Permanent(status.clone())));
                guard.retire(op.id);
            }
        }
        Ok(resp) => {
            if resp.statuses.len() != ops.len() || resp.write_results.len() != ops.len() {
                let err = firestore_gax::RpcStatus::new(Code::Internal, "batch-write response arrays did not match request length");
                let mut guard = inner.lock().await;
                for mut op in ops.drain(..) {
                    op.resolve(Err(Error::Permanent(err.clone())));
                    guard.retire(op.id);
                }
            } else {
                let policy = batch_write_policy();
                let mut guard = inner.lock().await;
                for (i, mut op) in ops.into_iter().enumerate() {
                    let status = &resp.statuses[i];
                    if status.code == Code::Ok {
                        let update_time = resp.write_results[i].clone().unwrap_or(Timestamp { seconds: 0, nanos: 0 });
                        let result = WriteResult { update_time };
                        if let Some(hook) = &guard.on_result {
                            hook(op.path.as_str(), &result);
                        }
                        let op_id = op.id;
                        op.resolve(Ok(result));
                        guard.retire(op_id);
                        continue;
                    }

                    let classification = firestore_gax::classify(status, &policy, false);
                    let event = OpErrorEvent {
                        kind: op.kind,
                        path: op.path.as_str().to_string(),
                        attempts: op.attempt + 1,
                        code: status.code,
                    };
                    let should_retry = classification.is_retryable()
                        && op.attempt + 1 < guard.config.max_retry_attempts
                        && guard.on_error.as_ref().map_or(true, |hook| hook(&event));

                    if should_retry {
                        let rate_limited = matches!(classification, Classification::RateLimited);
                        schedule_retry(&mut guard, op, rate_limited);
                    } else {
                        let op_id = op.id;
                        op.resolve(Err(Error::BulkWritePerOp {
                            kind: event.kind,
                            path: event.path,
                            attempts: event.attempts,
                            code: event.code,
                        }));
                        guard.retire(op_id);
                    }
                }
            }
        }
    }

    let mut guard = inner.lock().await;
    if let Some(batch) = guard.queue.iter_mut().find(|b| b.id == batch_id) {
        batch.mark_completed();
    }
    guard.queue.retain(|b| b.state != BatchState::Completed);
    drain_pending_buffer(&mut guard);
}

/// §4.6.4: re-enqueues a failed operation into a dedicated retry batch with
/// per-operation exponential backoff, resetting straight to the max delay on
/// RESOURCE_EXHAUSTED.
fn schedule_retry(guard: &mut Inner, mut op: WriteOperation, rate_limited: bool) {
    let backoff = guard
        .retry_backoffs
        .entry(op.id)
        .or_insert_with(|| ExponentialBackoff::new(BackoffConfig::default()));
    if rate_limited {
        backoff.reset_to_max();
    }
    let delay = backoff.wait().unwrap_or_else(|_| backoff.peek_base());
    op.attempt += 1;
    if let Some(landed_id) = admit(guard, op, true) {
        if let Some(batch) = guard.queue.iter_mut().find(|b| b.id == landed_id) {
            batch.raise_delay_floor(delay);
        }
    }
    // else: the op overflowed into pending_buffer (§4.6.2); there is no
    // batch yet to raise a floor on until drain_pending_buffer admits it.
}

fn drain_pending_buffer(guard: &mut Inner) {
    while guard.total_pending() < guard.config.max_pending_ops {
        let Some(op) = guard.pending_buffer.pop_front() else { break };
        let is_retry = op.attempt > 0;
        admit(guard, op, is_retry);
    }
}
