//! The batch and batch-queue data model (§3).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::model::WriteOperation;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Open,
    ReadyToSend,
    Sent,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

/// An ordered, bounded sequence of write operations dispatched in one RPC
/// (§3 "Batch"). Invariant: no two operations in the batch reference the
/// same document path. Invariant: once `Sent`, operations are neither added
/// nor removed (enforced by `try_push` refusing once `state != Open`).
pub struct Batch {
    pub id: BatchId,
    pub state: BatchState,
    pub is_retry_batch: bool,
    operations: Vec<WriteOperation>,
    doc_paths: HashSet<String>,
    max_size: usize,
    /// The maximum of the per-operation backoff deadlines contributed by
    /// retried operations in this batch (§4.6.3 step 2).
    delay_floor: Duration,
    completed: Arc<Notify>,
}

impl Batch {
    pub fn new(id: BatchId, max_size: usize, is_retry_batch: bool) -> Self {
        Self {
            id,
            state: BatchState::Open,
            is_retry_batch,
            operations: Vec::new(),
            doc_paths: HashSet::new(),
            max_size,
            delay_floor: Duration::ZERO,
            completed: Arc::new(Notify::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.operations.len() >= self.max_size
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.doc_paths.contains(path)
    }

    pub fn delay_floor(&self) -> Duration {
        self.delay_floor
    }

    pub fn raise_delay_floor(&mut self, candidate: Duration) {
        self.delay_floor = self.delay_floor.max(candidate);
    }

    /// Appends an operation, returning it back if the batch cannot accept it
    /// (full, not Open, or the path already lives in the batch — §4.6.2).
    pub fn try_push(&mut self, op: WriteOperation) -> Result<(), WriteOperation> {
        if self.state != BatchState::Open || self.is_full() || self.doc_paths.contains(op.path.as_str()) {
            return Err(op);
        }
        self.doc_paths.insert(op.path.as_str().to_string());
        self.operations.push(op);
        Ok(())
    }

    pub fn mark_ready(&mut self) {
        if self.state == BatchState::Open {
            self.state = BatchState::ReadyToSend;
        }
    }

    pub fn mark_sent(&mut self) {
        self.state = BatchState::Sent;
    }

    pub fn mark_completed(&mut self) {
        self.state = BatchState::Completed;
        self.completed.notify_waiters();
    }

    pub fn completion_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.completed)
    }

    pub fn operations(&self) -> &[WriteOperation] {
        &self.operations
    }

    pub fn operations_mut(&mut self) -> &mut [WriteOperation] {
        &mut self.operations
    }

    /// Drains all operations, consuming the batch's ownership of them
    /// (§3's ownership note: "batches are exclusively owned by the
    /// bulk-write engine; write operations are co-owned by their batch and
    /// by the user-facing result sink").
    pub fn take_operations(&mut self) -> Vec<WriteOperation> {
        std::mem::take(&mut self.operations)
    }
}
