//! Calls through a real worker process: results, failures and handler state.

mod helpers;

use helpers::broker::{args, demo_worker, spawn_demo, test_config};
use offload::{Arguments, Broker, Call, ErrorKind};
use serde_json::json;

#[tokio::test]
async fn uppercase_returns_processor_prefixed_text() {
    let broker = spawn_demo("tester").await;

    let response = broker
        .call("uppercase", args(json!({"text": "blabla"})))
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.result(), Some(&json!("tester: BLABLA")));
    broker.shutdown().await;
}

#[tokio::test]
async fn response_key_matches_submitted_call() {
    let broker = spawn_demo("tester").await;

    let call = Call::new("add").arg("a", 40).arg("b", 2);
    let key = call.key();
    let submission = broker.submit(call);
    assert_eq!(submission.key(), key);

    let response = submission.await.unwrap();
    assert_eq!(response.key(), key);
    assert_eq!(response.result(), Some(&json!(42)));
    broker.shutdown().await;
}

#[tokio::test]
async fn ready_handshake_reports_methods_and_pid() {
    let broker = spawn_demo("tester").await;

    assert!(broker.methods().iter().any(|m| m == "uppercase"));
    assert!(broker.worker_pid() > 0);
    assert_ne!(broker.worker_pid(), std::process::id());
    assert!(broker.is_available());
    broker.shutdown().await;
}

#[tokio::test]
async fn unknown_method_fails_with_kind() {
    let broker = spawn_demo("tester").await;

    let response = broker.call("doesNotExist", Arguments::new()).await.unwrap();

    assert!(!response.is_success());
    let error = response.error().expect("failed response carries an error");
    assert_eq!(error.kind, ErrorKind::UnknownMethod);
    assert!(!error.message.is_empty());
    broker.shutdown().await;
}

#[tokio::test]
async fn handler_error_and_bad_arguments_are_failed_responses() {
    let broker = spawn_demo("tester").await;

    let failed = broker
        .call("fail", args(json!({"message": "no luck"})))
        .await
        .unwrap();
    let error = failed.into_result().unwrap_err();
    assert_eq!(error.kind, ErrorKind::HandlerFailed);
    assert_eq!(error.message, "no luck");

    let invalid = broker
        .call("add", args(json!({"a": "one", "b": 2})))
        .await
        .unwrap();
    assert_eq!(invalid.error().unwrap().kind, ErrorKind::InvalidArguments);
    broker.shutdown().await;
}

#[tokio::test]
async fn worker_survives_a_panicking_handler() {
    let broker = spawn_demo("tester").await;

    let panicked = broker
        .call("panic", args(json!({"message": "handler exploded"})))
        .await
        .unwrap();
    let error = panicked.error().unwrap();
    assert_eq!(error.kind, ErrorKind::HandlerFailed);
    assert!(error.message.contains("handler exploded"), "got: {}", error.message);

    let next = broker.call("echo", args(json!({"still": "alive"}))).await.unwrap();
    assert_eq!(next.result(), Some(&json!({"still": "alive"})));
    broker.shutdown().await;
}

#[tokio::test]
async fn handler_state_persists_across_calls() {
    let broker = spawn_demo("tester").await;

    for _ in 0..3 {
        broker
            .call("uppercase", args(json!({"text": "x"})))
            .await
            .unwrap();
    }
    let counter = broker.call("counter", Arguments::new()).await.unwrap();
    assert_eq!(counter.result(), Some(&json!(3)));
    broker.shutdown().await;
}

#[tokio::test]
async fn null_result_is_a_success() {
    let broker = spawn_demo("tester").await;

    let response = broker.call("sleep", args(json!({"ms": 1}))).await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.result(), Some(&json!(null)));
    broker.shutdown().await;
}

#[tokio::test]
async fn dispatch_bypasses_admission() {
    let broker = spawn_demo("tester").await;

    let response = broker
        .dispatch(Call::new("uppercase").arg("text", "direct"))
        .await
        .unwrap();
    assert_eq!(response.result(), Some(&json!("tester: DIRECT")));
    assert_eq!(broker.max_in_flight(), 0);
    broker.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn handler_printing_to_stdout_does_not_break_the_channel() {
    let broker = spawn_demo("tester").await;

    let printed = broker
        .call("print", args(json!({"message": "progress: loading weights"})))
        .await
        .unwrap();
    assert_eq!(printed.result(), Some(&json!("progress: loading weights")));

    let next = broker
        .call("uppercase", args(json!({"text": "quiet"})))
        .await
        .unwrap();
    assert_eq!(next.result(), Some(&json!("tester: QUIET")));
    assert!(broker.is_available());
    broker.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn factory_printing_to_stdout_does_not_break_startup() {
    let command = demo_worker("tester").arg("--startup-banner");
    let broker = Broker::spawn(test_config(), &command)
        .await
        .expect("banner must not reach the channel");

    let response = broker
        .call("uppercase", args(json!({"text": "hello"})))
        .await
        .unwrap();
    assert_eq!(response.result(), Some(&json!("tester: HELLO")));
    broker.shutdown().await;
}
