//! A scripted [`RpcSender`] used across the integration tests in this
//! directory. Each method consults a small queue/closure so a test can drive
//! the engine through a specific sequence of backend responses without a
//! real transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use firestore_core::rpc::{
    BatchWriteRequest, BatchWriteResponse, BeginTransactionRequest, BeginTransactionResponse, CommitRequest, CommitResponse,
    ElementStream, ListCollectionIdsRequest, ListCollectionIdsResponse, ListDocumentsRequest, ListDocumentsResponse, RollbackRequest,
    RpcSender, RunQueryRequest, StreamElement, TransactionToken,
};
use firestore_gax::RpcStatus;

pub fn element_stream(elements: Vec<Result<StreamElement, RpcStatus>>) -> ElementStream {
    stream::iter(elements).boxed()
}

type BatchWriteScript = Box<dyn Fn(&BatchWriteRequest, u32) -> Result<BatchWriteResponse, RpcStatus> + Send + Sync>;
type RunQueryScript = Box<dyn Fn(&RunQueryRequest, u32) -> Result<ElementStream, RpcStatus> + Send + Sync>;
type CommitScript = Box<dyn Fn(&CommitRequest, u32) -> Result<CommitResponse, RpcStatus> + Send + Sync>;

/// A fully scripted sender. Every method defaults to `unimplemented!()`;
/// tests wire up only the methods their scenario exercises via the
/// `with_*` builders.
pub struct FakeRpcSender {
    pub begin_calls: AtomicU32,
    pub commit_calls: AtomicU32,
    pub batch_write_calls: AtomicU32,
    pub run_query_calls: AtomicU32,
    pub rollbacks: Mutex<Vec<TransactionToken>>,
    begin_token: TransactionToken,
    commit_script: Option<CommitScript>,
    batch_write_script: Option<BatchWriteScript>,
    run_query_script: Option<RunQueryScript>,
    run_query_queue: Mutex<VecDeque<ElementStream>>,
}

impl Default for FakeRpcSender {
    fn default() -> Self {
        Self {
            begin_calls: AtomicU32::new(0),
            commit_calls: AtomicU32::new(0),
            batch_write_calls: AtomicU32::new(0),
            run_query_calls: AtomicU32::new(0),
            rollbacks: Mutex::new(Vec::new()),
            begin_token: TransactionToken(vec![1]),
            commit_script: None,
            batch_write_script: None,
            run_query_script: None,
            run_query_queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl FakeRpcSender {
    pub fn with_commit_script(mut self, script: CommitScript) -> Self {
        self.commit_script = Some(script);
        self
    }

    pub fn with_batch_write_script(mut self, script: BatchWriteScript) -> Self {
        self.batch_write_script = Some(script);
        self
    }

    /// Scripts `run_query` by call index — used when a test needs the *same*
    /// logical query to behave differently on the first open versus a
    /// mid-stream retry's reopen.
    pub fn with_run_query_script(mut self, script: RunQueryScript) -> Self {
        self.run_query_script = Some(script);
        self
    }

    /// Scripts `run_query` as a fixed queue of streams, one per call,
    /// consumed in order. Simpler than `with_run_query_script` when the
    /// sequence doesn't depend on the request itself.
    pub fn with_run_query_queue(self, streams: Vec<ElementStream>) -> Self {
        *self.run_query_queue.lock().unwrap() = streams.into_iter().collect();
        self
    }
}

#[async_trait]
impl RpcSender for FakeRpcSender {
    async fn begin_transaction(&self, _request: BeginTransactionRequest, _request_tag: &str) -> Result<BeginTransactionResponse, RpcStatus> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BeginTransactionResponse {
            transaction: self.begin_token.clone(),
        })
    }

    async fn commit(&self, request: CommitRequest, _request_tag: &str) -> Result<CommitResponse, RpcStatus> {
        let n = self.commit_calls.fetch_add(1, Ordering::SeqCst);
        match &self.commit_script {
            Some(script) => script(&request, n),
            None => Ok(CommitResponse {
                write_results: vec![],
                commit_time: firestore_core::value::Timestamp { seconds: 0, nanos: 0 },
            }),
        }
    }

    async fn rollback(&self, request: RollbackRequest, _request_tag: &str) -> Result<(), RpcStatus> {
        self.rollbacks.lock().unwrap().push(request.transaction);
        Ok(())
    }

    async fn batch_write(&self, request: BatchWriteRequest, _request_tag: &str, _allow_retry: bool) -> Result<BatchWriteResponse, RpcStatus> {
        let n = self.batch_write_calls.fetch_add(1, Ordering::SeqCst);
        match &self.batch_write_script {
            Some(script) => script(&request, n),
            None => unimplemented!("batch_write not scripted for this test"),
        }
    }

    async fn run_query(&self, request: RunQueryRequest, _request_tag: &str) -> Result<ElementStream, RpcStatus> {
        let n = self.run_query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(script) = &self.run_query_script {
            return script(&request, n);
        }
        if let Some(stream) = self.run_query_queue.lock().unwrap().pop_front() {
            return Ok(stream);
        }
        unimplemented!("run_query not scripted for this test")
    }

    async fn batch_get_documents(&self, _request: RunQueryRequest, _request_tag: &str) -> Result<ElementStream, RpcStatus> {
        unimplemented!("batch_get_documents not scripted for this test")
    }

    async fn list_collection_ids(
        &self,
        _request: ListCollectionIdsRequest,
        _request_tag: &str,
    ) -> Result<ListCollectionIdsResponse, RpcStatus> {
        unimplemented!("list_collection_ids not scripted for this test")
    }

    async fn list_documents(&self, _request: ListDocumentsRequest, _request_tag: &str) -> Result<ListDocumentsResponse, RpcStatus> {
        unimplemented!("list_documents not scripted for this test")
    }
}
