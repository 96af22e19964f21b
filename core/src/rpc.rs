//! The RPC sender contract (§6): exactly what the core needs from the
//! external transport/auth/channel layer, which this specification treats as
//! an out-of-scope collaborator (§1).

use async_trait::async_trait;
use firestore_gax::RpcStatus;
use futures::stream::BoxStream;

use crate::model::{Payload, MutationKind, Precondition};
use crate::path::DocumentPath;
use crate::value::Timestamp;

/// An opaque transaction token returned by `begin_transaction` and carried on
/// every subsequent read and on the commit (§3, GLOSSARY).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionToken(pub Vec<u8>);

/// The wire shape of a single write, built from a [`crate::model::WriteOperation`]
/// at dispatch time (§3). `precondition` is carried as its own field per §9's
/// wire shape rather than folded into `kind`, so the backend can evaluate it
/// independently of the mutation it guards.
#[derive(Clone, Debug)]
pub struct WriteEntry {
    pub path: DocumentPath,
    pub kind: MutationKind,
    pub payload: Payload,
    pub precondition: Option<Precondition>,
}

#[derive(Clone, Debug)]
pub struct BeginTransactionRequest {
    pub database: String,
    /// Carries the previous attempt's token as a retry hint (§4.5 step 1).
    pub retry_with: Option<TransactionToken>,
    /// A caller-supplied tag distinguishing a fresh transaction from a retry
    /// under a second, tagged transaction (§1 item 2).
    pub transaction_tag: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BeginTransactionResponse {
    pub transaction: TransactionToken,
}

#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub database: String,
    pub transaction: Option<TransactionToken>,
    pub writes: Vec<WriteEntry>,
}

/// §6: "If an individual write carries a transform, the backend may split it
/// into two wire entries; the client must collapse them back to one result
/// per user operation by using only the last entry of the split pair." The
/// collapsing happens before this response reaches the transaction runner —
/// `write_results` is already one entry per user write, following the newer
/// contract named in §9's open question.
#[derive(Clone, Debug)]
pub struct CommitResponse {
    pub write_results: Vec<Option<Timestamp>>,
    pub commit_time: Timestamp,
}

#[derive(Clone, Debug)]
pub struct RollbackRequest {
    pub database: String,
    pub transaction: TransactionToken,
}

#[derive(Clone, Debug)]
pub struct BatchWriteRequest {
    pub database: String,
    pub writes: Vec<WriteEntry>,
}

/// §6: "response carries two parallel lists ... Arrays are required to have
/// equal length matching the request."
#[derive(Clone, Debug)]
pub struct BatchWriteResponse {
    pub write_results: Vec<Option<Timestamp>>,
    pub statuses: Vec<RpcStatus>,
}

/// A query descriptor, opaque to the engine beyond the cursor/read-time
/// fields the stream executor needs to rebuild it on retry (§4.4).
#[derive(Clone, Debug)]
pub struct QueryDescriptor {
    pub database: String,
    pub collection: String,
    /// Opaque beyond its role as a cursor anchor; real filters/orders live in
    /// the out-of-scope query-builder surface (§1).
    pub start_after: Option<DocumentSnapshot>,
    pub limit_to_last: bool,
}

#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub read_time: Timestamp,
    pub fields: std::collections::BTreeMap<String, crate::value::Value>,
}

#[derive(Clone, Debug)]
pub struct RunQueryRequest {
    pub database: String,
    pub query: QueryDescriptor,
    pub transaction: Option<TransactionToken>,
    /// Pinned only when consistency is required on a retry (§4.4 step 3).
    pub read_time: Option<Timestamp>,
}

/// One element of a `run_query`/`batch_get_documents` stream (§4.4).
#[derive(Clone, Debug)]
pub enum StreamElement {
    Document(DocumentSnapshot),
    ReadTime(Timestamp),
    /// Present only on the first message of a transactional stream.
    Transaction(TransactionToken),
    ExplainMetrics(String),
    Done,
}

pub type ElementStream = BoxStream<'static, Result<StreamElement, RpcStatus>>;

#[derive(Clone, Debug)]
pub struct ListCollectionIdsRequest {
    pub database: String,
    pub parent: DocumentPath,
    pub page_size: i32,
    pub page_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ListCollectionIdsResponse {
    pub collection_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ListDocumentsRequest {
    pub database: String,
    pub parent: DocumentPath,
    pub collection: String,
    pub page_size: i32,
    pub page_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ListDocumentsResponse {
    pub documents: Vec<DocumentSnapshot>,
    pub next_page_token: Option<String>,
}

/// Exactly the surface the core needs from the transport layer (§6). Channel
/// construction, auth and project-ID detection live behind whatever
/// implements this trait and are out of scope here (§1).
///
/// `read_write_stream` (bidirectional streams) is part of the real contract
/// but is used only by the change-listener subsystem, which §1 excludes; it
/// is intentionally not part of this trait.
#[async_trait]
pub trait RpcSender: Send + Sync {
    async fn begin_transaction(
        &self,
        request: BeginTransactionRequest,
        request_tag: &str,
    ) -> Result<BeginTransactionResponse, RpcStatus>;

    async fn commit(
        &self,
        request: CommitRequest,
        request_tag: &str,
    ) -> Result<CommitResponse, RpcStatus>;

    async fn rollback(&self, request: RollbackRequest, request_tag: &str) -> Result<(), RpcStatus>;

    /// Retries are applied at the RPC layer for retryable gRPC errors up to a
    /// fixed bound (§4.6.3 step 3). The bulk writer's own retry loop only
    /// re-dispatches individual failed operations in new batches — it never
    /// re-issues the same request — so `allow_retry` is always `true` here.
    async fn batch_write(
        &self,
        request: BatchWriteRequest,
        request_tag: &str,
        allow_retry: bool,
    ) -> Result<BatchWriteResponse, RpcStatus>;

    /// Opens a server-stream for `run_query`, delivered paused and resumable
    /// per §6.
    async fn run_query(
        &self,
        request: RunQueryRequest,
        request_tag: &str,
    ) -> Result<ElementStream, RpcStatus>;

    async fn batch_get_documents(
        &self,
        request: RunQueryRequest,
        request_tag: &str,
    ) -> Result<ElementStream, RpcStatus>;

    async fn list_collection_ids(
        &self,
        request: ListCollectionIdsRequest,
        request_tag: &str,
    ) -> Result<ListCollectionIdsResponse, RpcStatus>;

    async fn list_documents(
        &self,
        request: ListDocumentsRequest,
        request_tag: &str,
    ) -> Result<ListDocumentsResponse, RpcStatus>;
}
