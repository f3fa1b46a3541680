//! Admission control and key correlation under concurrent submissions.

mod helpers;

use helpers::broker::{args, spawn_demo, spawn_demo_with, test_config};
use offload::BrokerConfig;
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn more_submissions_than_capacity_all_complete() {
    let broker = spawn_demo("tester").await;
    assert_eq!(broker.config().pool_capacity, 256);

    let submissions: Vec<_> = (0..300)
        .map(|i| {
            broker.submit(offload::Call::new("uppercase").arg("text", format!("call {}", i)))
        })
        .collect();

    for (i, submission) in submissions.into_iter().enumerate() {
        let response = submission.await.unwrap();
        assert_eq!(
            response.result(),
            Some(&json!(format!("tester: CALL {}", i)))
        );
    }

    assert!(broker.max_in_flight() <= 256, "got {}", broker.max_in_flight());
    assert_eq!(broker.in_flight(), 0);
    assert_eq!(broker.pending_responses(), 0);
    broker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_pool_limits_in_flight_submissions() {
    let config = BrokerConfig {
        pool_capacity: 4,
        ..test_config()
    };
    let broker = spawn_demo_with("tester", config).await;

    let submissions: Vec<_> = (0..20)
        .map(|_| {
            broker.submit(
                offload::Call::with_arguments(
                    "uppercase",
                    args(json!({"text": "slow", "delay_ms": 10})),
                ),
            )
        })
        .collect();

    for submission in submissions {
        assert!(submission.await.unwrap().is_success());
    }

    let peak = broker.max_in_flight();
    assert!((1..=4).contains(&peak), "peak in flight was {}", peak);
    broker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_receive_their_own_results() {
    let broker = spawn_demo("tester").await;

    let mut tasks = Vec::new();
    for i in 0..50 {
        let broker = broker.clone();
        tasks.push(tokio::spawn(async move {
            let call = offload::Call::new("echo").arg("index", i);
            let key = call.key();
            let response = broker.submit(call).await.unwrap();
            (i, key, response)
        }));
    }

    for task in tasks {
        let (i, key, response) = task.await.unwrap();
        assert_eq!(response.key(), key);
        assert_eq!(response.result(), Some(&json!({"index": i})));
    }
    broker.shutdown().await;
}
