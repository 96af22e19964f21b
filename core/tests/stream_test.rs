mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use firestore_core::config::StreamConfig;
use firestore_core::path::DocumentPath;
use firestore_core::rpc::{DocumentSnapshot, StreamElement};
use firestore_core::stream::{run_query_buffered, Consistency, QueryStream};
use firestore_core::value::Timestamp;
use firestore_core::Error;
use firestore_gax::{Code, RpcStatus};

use support::{element_stream, FakeRpcSender};

fn doc(path: &str, seconds: i64) -> DocumentSnapshot {
    DocumentSnapshot {
        path: DocumentPath::parse(path).unwrap(),
        read_time: Timestamp { seconds, nanos: 0 },
        fields: BTreeMap::new(),
    }
}

#[tokio::test]
async fn reopens_from_the_last_delivered_cursor_after_a_retryable_error() {
    let sender = Arc::new(FakeRpcSender::default().with_run_query_queue(vec![
        element_stream(vec![
            Ok(StreamElement::ReadTime(Timestamp { seconds: 10, nanos: 0 })),
            Ok(StreamElement::Document(doc("users/a", 10))),
            Err(RpcStatus::new(Code::Unavailable, "stream reset")),
        ]),
        element_stream(vec![
            Ok(StreamElement::Document(doc("users/b", 10))),
            Ok(StreamElement::Done),
        ]),
    ]));

    let mut stream = QueryStream::open(
        sender.clone(),
        "projects/p/databases/(default)",
        "users",
        None,
        Consistency::Fresh,
        false,
        false,
        StreamConfig::default(),
    )
    .await
    .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.path, DocumentPath::parse("users/a").unwrap());

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.path, DocumentPath::parse("users/b").unwrap());

    assert!(stream.next().await.is_none());
    assert_eq!(sender.run_query_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn an_in_transaction_stream_never_retries_mid_stream_errors() {
    let sender = Arc::new(FakeRpcSender::default().with_run_query_queue(vec![element_stream(vec![Err(RpcStatus::new(
        Code::Unavailable,
        "stream reset",
    ))])]));

    let mut stream = QueryStream::open(
        sender.clone(),
        "projects/p/databases/(default)",
        "users",
        Some(firestore_core::rpc::TransactionToken(vec![1])),
        Consistency::Pinned,
        false,
        false,
        StreamConfig::default(),
    )
    .await
    .unwrap();

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Permanent(_)));
    assert_eq!(sender.run_query_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn an_explain_query_never_retries_mid_stream_errors() {
    let sender = Arc::new(FakeRpcSender::default().with_run_query_queue(vec![element_stream(vec![Err(RpcStatus::new(
        Code::Unavailable,
        "stream reset",
    ))])]));

    let mut stream = QueryStream::open(
        sender.clone(),
        "projects/p/databases/(default)",
        "users",
        None,
        Consistency::Fresh,
        false,
        true,
        StreamConfig::default(),
    )
    .await
    .unwrap();

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Permanent(_)));
    assert_eq!(sender.run_query_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_pinned_stream_rejects_a_document_whose_read_time_has_drifted() {
    let sender = Arc::new(FakeRpcSender::default().with_run_query_queue(vec![element_stream(vec![
        Ok(StreamElement::Document(doc("users/a", 10))),
        Ok(StreamElement::Document(doc("users/b", 11))),
    ])]));

    let mut stream = QueryStream::open(
        sender,
        "projects/p/databases/(default)",
        "users",
        None,
        Consistency::Pinned,
        false,
        false,
        StreamConfig::default(),
    )
    .await
    .unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, Error::StreamConsistencyViolation(_)));
}

#[tokio::test]
async fn opening_a_limit_to_last_stream_is_rejected_synchronously() {
    let sender = Arc::new(FakeRpcSender::default());
    let err = QueryStream::open(
        sender,
        "projects/p/databases/(default)",
        "users",
        None,
        Consistency::Fresh,
        true,
        false,
        StreamConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::LimitToLastRequiresBuffering));
}

#[tokio::test]
async fn run_query_buffered_truncates_to_the_trailing_limit_and_restores_ascending_order() {
    // The backend is expected to apply limit_to_last itself and deliver the
    // trailing window already reversed; run_query_buffered must reverse it
    // back before returning.
    let sender = Arc::new(FakeRpcSender::default().with_run_query_script(Box::new(|request, _n| {
        assert!(request.query.limit_to_last, "run_query_buffered must request limit_to_last on the wire");
        Ok(element_stream(vec![
            Ok(StreamElement::Document(doc("users/c", 1))),
            Ok(StreamElement::Document(doc("users/b", 1))),
            Ok(StreamElement::Done),
        ]))
    })));

    let docs = run_query_buffered(sender, "projects/p/databases/(default)", "users", 2, StreamConfig::default())
        .await
        .unwrap();

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].path, DocumentPath::parse("users/b").unwrap());
    assert_eq!(docs[1].path, DocumentPath::parse("users/c").unwrap());
}
