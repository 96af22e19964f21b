//! The in-transaction read/write handle (§4.5 step 2, component E).
//!
//! Grounded on the teacher's base `Transaction` (`query`/`read` building
//! requests against a session) and `transaction_rw.rs`'s `buffer_write`: here
//! every read additionally carries the transaction token, and the
//! reads-after-writes invariant (§7.3) closes the read set the moment a
//! write is buffered.

use std::sync::Arc;

use futures::StreamExt;

use crate::config::StreamConfig;
use crate::error::Error;
use crate::model::{next_request_tag, MutationKind, Payload, Precondition};
use crate::path::{CollectionPath, DocumentPath};
use crate::rpc::{DocumentSnapshot, QueryDescriptor, RpcSender, RunQueryRequest, StreamElement, TransactionToken, WriteEntry};
use crate::stream::{Consistency, QueryStream};

/// A handle passed to the transaction runner's user callback. Reads are
/// served against the backend at the transaction's snapshot; writes are
/// buffered locally and sent as one commit once the callback returns.
pub struct Transaction {
    rpc: Arc<dyn RpcSender>,
    database: String,
    token: TransactionToken,
    writes: Vec<WriteEntry>,
    read_closed: bool,
}

impl Transaction {
    pub(crate) fn new(rpc: Arc<dyn RpcSender>, database: String, token: TransactionToken) -> Self {
        Self {
            rpc,
            database,
            token,
            writes: Vec::new(),
            read_closed: false,
        }
    }

    pub fn token(&self) -> &TransactionToken {
        &self.token
    }

    fn check_reads_allowed(&self) -> Result<(), Error> {
        if self.read_closed {
            return Err(Error::ReadsAfterWrites);
        }
        Ok(())
    }

    /// Fetches a single document at the transaction's snapshot, or `None` if
    /// it does not exist.
    pub async fn get(&self, path: &DocumentPath) -> Result<Option<DocumentSnapshot>, Error> {
        self.check_reads_allowed()?;
        let request_tag = next_request_tag("batch_get_documents");
        let request = RunQueryRequest {
            database: self.database.clone(),
            query: QueryDescriptor {
                database: self.database.clone(),
                collection: path.as_str().to_string(),
                start_after: None,
                limit_to_last: false,
            },
            transaction: Some(self.token.clone()),
            read_time: None,
        };
        let mut stream = self.rpc.batch_get_documents(request, &request_tag).await.map_err(Error::Permanent)?;
        let mut found = None;
        while let Some(element) = stream.next().await {
            match element.map_err(Error::Permanent)? {
                StreamElement::Document(doc) => found = Some(doc),
                StreamElement::Done => break,
                _ => continue,
            }
        }
        Ok(found)
    }

    /// Fetches several documents at the transaction's snapshot.
    ///
    /// The wire contract (§6) expresses a batch-get as a single query
    /// descriptor rather than a list of paths; this loops [`Transaction::get`]
    /// per path rather than widening that contract for a handful of reads.
    pub async fn get_all(&self, paths: &[DocumentPath]) -> Result<Vec<Option<DocumentSnapshot>>, Error> {
        self.check_reads_allowed()?;
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            results.push(self.get(path).await?);
        }
        Ok(results)
    }

    /// Opens a query at the transaction's snapshot. In-transaction streams
    /// never retry on a mid-stream error (§4.4): any error fails the whole
    /// transaction attempt, leaving the runner to decide whether to retry.
    pub async fn query(&self, collection: &CollectionPath) -> Result<QueryStream, Error> {
        self.check_reads_allowed()?;
        QueryStream::open(
            Arc::clone(&self.rpc),
            self.database.clone(),
            collection.as_str().to_string(),
            Some(self.token.clone()),
            Consistency::Pinned,
            false,
            false,
            StreamConfig::default(),
        )
        .await
    }

    pub fn create(&mut self, path: DocumentPath, fields: std::collections::BTreeMap<String, crate::value::Value>) {
        self.buffer(path, MutationKind::Create, Payload::Fields(fields), Some(Precondition::MustNotExist));
    }

    pub fn set(&mut self, path: DocumentPath, fields: std::collections::BTreeMap<String, crate::value::Value>) {
        self.buffer(path, MutationKind::Set, Payload::Fields(fields), None);
    }

    pub fn update(&mut self, path: DocumentPath, field_paths: std::collections::BTreeMap<String, crate::value::Value>) {
        self.buffer(path, MutationKind::Update, Payload::FieldPaths(field_paths), Some(Precondition::MustExist));
    }

    pub fn delete(&mut self, path: DocumentPath) {
        self.buffer(path, MutationKind::Delete, Payload::None, None);
    }

    fn buffer(&mut self, path: DocumentPath, kind: MutationKind, payload: Payload, precondition: Option<Precondition>) {
        self.read_closed = true;
        self.writes.push(WriteEntry { path, kind, payload, precondition });
    }

    /// Builds a `WriteEntry` with an explicit precondition (§9's wire shape:
    /// an enum carried on the write entry), for callers that need one other
    /// than the defaults `create`/`update` apply.
    pub fn buffer_raw(&mut self, path: DocumentPath, kind: MutationKind, payload: Payload, precondition: Option<Precondition>) {
        self.buffer(path, kind, payload, precondition);
    }

    pub(crate) fn take_writes(&mut self) -> Vec<WriteEntry> {
        std::mem::take(&mut self.writes)
    }
}
