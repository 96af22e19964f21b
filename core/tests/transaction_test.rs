mod support;

use std::sync::Arc;

use firestore_core::config::TransactionConfig;
use firestore_core::path::DocumentPath;
use firestore_core::{Error, TransactionRunner};
use firestore_gax::{Code, RpcStatus};

use support::FakeRpcSender;

#[tokio::test]
async fn retries_the_whole_attempt_on_aborted_commit() {
    let sender = Arc::new(FakeRpcSender::default().with_commit_script(Box::new(|_request, n| {
        if n < 2 {
            Err(RpcStatus::new(Code::Aborted, "concurrent modification"))
        } else {
            Ok(firestore_core::rpc::CommitResponse {
                write_results: vec![],
                commit_time: firestore_core::value::Timestamp { seconds: 0, nanos: 0 },
            })
        }
    })));

    let runner = TransactionRunner::new("projects/p/databases/(default)", sender.clone(), TransactionConfig::default()).unwrap();

    let result = runner
        .run(|txn| async move {
            let mut txn = txn.lock().await;
            txn.set(DocumentPath::parse("users/ada").unwrap(), Default::default());
            Ok::<_, Error>(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(sender.commit_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    // begin_transaction runs once per attempt, including retries.
    assert_eq!(sender.begin_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn a_non_retryable_commit_failure_is_not_retried() {
    let sender = Arc::new(
        FakeRpcSender::default().with_commit_script(Box::new(|_request, _n| Err(RpcStatus::new(Code::FailedPrecondition, "nope")))),
    );

    let runner = TransactionRunner::new("projects/p/databases/(default)", sender.clone(), TransactionConfig::default()).unwrap();

    let result = runner
        .run(|txn| async move {
            let mut txn = txn.lock().await;
            txn.set(DocumentPath::parse("users/ada").unwrap(), Default::default());
            Ok::<_, Error>(())
        })
        .await;

    assert!(matches!(result, Err(Error::Permanent(_))));
    assert_eq!(sender.commit_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reads_after_writes_are_rejected_within_a_running_transaction() {
    let sender = Arc::new(FakeRpcSender::default());
    let runner = TransactionRunner::new("projects/p/databases/(default)", sender, TransactionConfig::default()).unwrap();

    let result = runner
        .run(|txn| async move {
            let mut txn = txn.lock().await;
            txn.delete(DocumentPath::parse("users/ada").unwrap());
            let err = txn.get(&DocumentPath::parse("users/bob").unwrap()).await.unwrap_err();
            assert!(matches!(err, Error::ReadsAfterWrites));
            Ok::<_, Error>(())
        })
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn a_cancelled_token_stops_further_attempts() {
    let sender = Arc::new(FakeRpcSender::default().with_commit_script(Box::new(|_request, _n| {
        Err(RpcStatus::new(Code::Aborted, "concurrent modification"))
    })));
    let token = firestore_gax::CancellationToken::new();
    let runner = TransactionRunner::new("projects/p/databases/(default)", sender, TransactionConfig::default())
        .unwrap()
        .with_cancellation(token.clone());

    token.cancel();

    let result = runner
        .run(|txn| async move {
            let mut txn = txn.lock().await;
            txn.set(DocumentPath::parse("users/ada").unwrap(), Default::default());
            Ok::<_, Error>(())
        })
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
}
