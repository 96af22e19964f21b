//! The transaction retry loop (§4.5, component E).
//!
//! Grounded on the teacher's `Client::read_write_transaction` (session reuse
//! across attempts, distinct handling of a not-found session versus an
//! aborted transaction) and `transaction_manager.rs`'s token-carrying retry.
//! Here the retry hint is the previous attempt's transaction token rather
//! than a session handle, per §4.5 step 1.

use std::future::Future;
use std::sync::Arc;

use firestore_gax::status::MethodRetryPolicy;
use firestore_gax::{classify, CancellationToken};

use crate::config::TransactionConfig;
use crate::error::Error;
use crate::model::next_request_tag;
use crate::rpc::{BeginTransactionRequest, CommitRequest, RollbackRequest, RpcSender, TransactionToken};
use crate::transaction::Transaction;

fn commit_policy() -> MethodRetryPolicy {
    MethodRetryPolicy {
        retry_aborted: true,
        ..Default::default()
    }
}

/// Runs a user callback inside a read-write transaction, retrying the whole
/// attempt on a retryable commit failure (notably ABORTED) up to
/// `TransactionConfig::max_attempts` (§4.5).
pub struct TransactionRunner {
    rpc: Arc<dyn RpcSender>,
    database: String,
    config: TransactionConfig,
    cancel: Option<CancellationToken>,
}

impl TransactionRunner {
    pub fn new(database: impl Into<String>, rpc: Arc<dyn RpcSender>, config: TransactionConfig) -> Result<Self, Error> {
        let config = config.validate()?;
        Ok(Self {
            rpc,
            database: database.into(),
            config,
            cancel: None,
        })
    }

    /// Cancelling `token` between attempts stops further retries with
    /// `Error::Cancelled` (§7.4) instead of beginning another attempt. An
    /// attempt already in flight still runs to completion — cancellation is
    /// cooperative, checked between attempts, not a hard abort mid-RPC.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// `callback` receives a handle to a fresh [`Transaction`] on every
    /// attempt — including retries, since reads must be re-issued against the
    /// new snapshot (§4.5 step 2). The handle is `Arc<Mutex<Transaction>>`
    /// rather than a borrowed reference, following the teacher's
    /// `read_write_transaction` shape, so the callback's future is free to
    /// `.await` other work while holding it without fighting the borrow
    /// checker over a reference with no natural lifetime to name. Returning
    /// `Err` from the callback aborts the whole run immediately (no retry)
    /// after a best-effort rollback.
    pub async fn run<F, Fut, T>(&self, callback: F) -> Result<T, Error>
    where
        F: Fn(Arc<tokio::sync::Mutex<Transaction>>) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut retry_with: Option<TransactionToken> = None;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            let begin_tag = next_request_tag("begin_transaction");
            let begin = self
                .rpc
                .begin_transaction(
                    BeginTransactionRequest {
                        database: self.database.clone(),
                        retry_with: retry_with.take(),
                        transaction_tag: None,
                    },
                    &begin_tag,
                )
                .await
                .map_err(Error::Permanent)?;

            let txn = Arc::new(tokio::sync::Mutex::new(Transaction::new(
                Arc::clone(&self.rpc),
                self.database.clone(),
                begin.transaction.clone(),
            )));

            let outcome = callback(Arc::clone(&txn)).await;
            let value = match outcome {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(error = %e, "transaction callback failed, rolling back");
                    if let Err(rollback_err) = self.rollback(&begin.transaction).await {
                        tracing::warn!(callback_error = %e, rollback_error = %rollback_err, "rollback failed after callback error; both are surfaced here");
                    }
                    return Err(e);
                }
            };

            let writes = txn.lock().await.take_writes();
            let commit_tag = next_request_tag("commit");
            let commit = self
                .rpc
                .commit(
                    CommitRequest {
                        database: self.database.clone(),
                        transaction: Some(begin.transaction.clone()),
                        writes,
                    },
                    &commit_tag,
                )
                .await;

            match commit {
                Ok(_resp) => return Ok(value),
                Err(status) => {
                    let classification = classify(&status, &commit_policy(), false);
                    if classification.is_retryable() && attempt < self.config.max_attempts {
                        tracing::debug!(code = ?status.code, attempt, "commit failed, retrying transaction");
                        retry_with = Some(begin.transaction);
                        continue;
                    }
                    return Err(if classification.is_retryable() {
                        Error::RetriesExhausted { attempts: attempt, last: status }
                    } else {
                        Error::Permanent(status)
                    });
                }
            }
        }
    }

    async fn rollback(&self, token: &TransactionToken) -> Result<(), Error> {
        let tag = next_request_tag("rollback");
        self.rpc
            .rollback(
                RollbackRequest {
                    database: self.database.clone(),
                    transaction: token.clone(),
                },
                &tag,
            )
            .await
            .map_err(Error::Permanent)
    }
}
