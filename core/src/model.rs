//! The write-operation data model (§3).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::oneshot;

use crate::error::Error;
use crate::path::DocumentPath;
use crate::value::{Timestamp, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Set,
    Update,
    Delete,
}

/// A write precondition (§3, supplemented in SPEC_FULL.md §9 with the exact
/// wire shape): evaluated by the backend, surfaced to the classifier as
/// FAILED_PRECONDITION when violated, which is always permanent (§8's
/// idempotence law: a retried `create` must not silently re-succeed).
#[derive(Clone, Debug, PartialEq)]
pub enum Precondition {
    MustExist,
    MustNotExist,
    LastUpdateTime(Timestamp),
}

/// The payload of a write: either a full field tree (create/set) or a sparse
/// map of field-path to value (update).
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Fields(BTreeMap<String, Value>),
    FieldPaths(BTreeMap<String, Value>),
    None,
}

/// Outcome of a single write operation, delivered on its result sink.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteResult {
    pub update_time: Timestamp,
}

/// An opaque, monotonically increasing tag correlating a request (and any
/// retries of it) across logs — purely ambient (SPEC_FULL.md §10.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestTag(pub u64);

static NEXT_REQUEST_TAG: AtomicU32 = AtomicU32::new(1);

pub fn next_request_tag(method: &'static str) -> String {
    let n = NEXT_REQUEST_TAG.fetch_add(1, Ordering::Relaxed);
    format!("{method}-{n}")
}

static NEXT_OPERATION_ID: AtomicU32 = AtomicU32::new(1);

/// A single-document mutation (§3 "Write operation").
///
/// Created when the user submits a mutation; the `result` sink is consumed
/// exactly once, either with `Ok` (a server write-time) or `Err` (a
/// classified error per §7). `id` is stable across retries (the same logical
/// operation re-enters the queue with a higher `attempt`, never a new `id`)
/// so the bulk writer can track an operation's liveness for `flush()` and key
/// its per-operation backoff state.
pub struct WriteOperation {
    pub id: u64,
    pub path: DocumentPath,
    pub kind: MutationKind,
    pub payload: Payload,
    pub precondition: Option<Precondition>,
    pub attempt: u32,
    result: Option<oneshot::Sender<Result<WriteResult, Error>>>,
}

impl WriteOperation {
    pub fn new(
        path: DocumentPath,
        kind: MutationKind,
        payload: Payload,
        precondition: Option<Precondition>,
    ) -> (Self, oneshot::Receiver<Result<WriteResult, Error>>) {
        let (tx, rx) = oneshot::channel();
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed) as u64;
        (
            Self {
                id,
                path,
                kind,
                payload,
                precondition,
                attempt: 0,
                result: Some(tx),
            },
            rx,
        )
    }

    /// Resolves the operation's result sink. A second call is a no-op: the
    /// sink is consumed exactly once by construction (§3's "destroyed after
    /// its result sink resolves").
    pub fn resolve(&mut self, result: Result<WriteResult, Error>) {
        if let Some(tx) = self.result.take() {
            if tx.send(result).is_err() {
                tracing::warn!(operation_id = self.id, path = %self.path, "result dropped: receiver gone before resolve");
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_none()
    }
}

impl std::fmt::Debug for WriteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteOperation")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("attempt", &self.attempt)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
