mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use leanmq::config::ServiceConfig;
use leanmq::dispatcher::Dispatcher;
use leanmq::router::{Handler, Router};
use leanmq::supervisor::{Supervisor, SupervisorState};

fn body(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// S1 — Publish/claim/ack roundtrip.
#[tokio::test]
async fn publish_claim_ack_roundtrip() {
    let (_container, service) = common::spawn_service("s1_").await;
    let (main, _dlq) = service.create_queue_pair("orders").await.unwrap();

    let id_a = main
        .publish(body(&[("id", Value::from("A")), ("n", Value::from(1))]), None)
        .await
        .unwrap();
    let id_b = main
        .publish(body(&[("id", Value::from("A")), ("n", Value::from(2))]), None)
        .await
        .unwrap();

    let claimed = main.claim(10, None, None).await.unwrap();
    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].id, id_a);
    assert_eq!(claimed[1].id, id_b);

    let acked = main.acknowledge(&[id_a, id_b]).await.unwrap();
    assert_eq!(acked, 2);

    let info = main.info().await.unwrap();
    assert_eq!(info.pending_count, 0);
    assert_eq!(info.message_count, 2);
}

/// S2 — DLQ relocation.
#[tokio::test]
async fn dlq_relocation() {
    let (_container, service) = common::spawn_service("s2_").await;
    let (main, dlq) = service.create_queue_pair("t").await.unwrap();

    let id = main.publish(body(&[("x", Value::from(1))]), None).await.unwrap();
    main.claim(1, None, None).await.unwrap();
    main.move_to_dlq(&[id], "boom", None).await.unwrap();

    assert_eq!(main.info().await.unwrap().message_count, 0);

    let claimed = dlq.claim(1, None, None).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].body.get("x").unwrap(), &Value::from(1));
    assert_eq!(claimed[0].error_reason(), Some("boom"));
}

/// S3 — Requeue.
#[tokio::test]
async fn requeue_from_dlq() {
    let (_container, service) = common::spawn_service("s3_").await;
    let (main, dlq) = service.create_queue_pair("t").await.unwrap();

    let id = main.publish(body(&[("x", Value::from(1))]), None).await.unwrap();
    main.claim(1, None, None).await.unwrap();
    main.move_to_dlq(&[id], "boom", None).await.unwrap();

    let dlq_messages = dlq.claim(1, None, None).await.unwrap();
    let dlq_id = dlq_messages[0].id.clone();
    dlq.requeue(&[dlq_id], None).await.unwrap();

    assert_eq!(dlq.info().await.unwrap().message_count, 0);

    let requeued = main.claim(10, None, None).await.unwrap();
    assert_eq!(requeued.len(), 1);
    assert!(requeued[0].error_reason().is_none());
}

/// S4 — TTL sweep.
#[tokio::test]
async fn ttl_sweep_removes_expired_messages() {
    let (_container, service) = common::spawn_service("s4_").await;
    let (main, _dlq) = service.create_queue_pair("expiring").await.unwrap();

    main.publish(body(&[("x", Value::from(1))]), Some(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let removed = service.sweep_expired().await.unwrap();
    assert_eq!(removed, 1);

    let claimed = main.claim(10, None, None).await.unwrap();
    assert!(claimed.is_empty());
}

/// S5 — Transaction atomicity (success).
#[tokio::test]
async fn transaction_commits_all_publishes_atomically() {
    let (_container, service) = common::spawn_service("s5_").await;
    let (q1, _) = service.create_queue_pair("q1").await.unwrap();
    let (q2, _) = service.create_queue_pair("q2").await.unwrap();

    let mut txn = service.transaction();
    txn.send(&q1, body(&[("a", Value::from(1))]), None).unwrap();
    txn.send(&q2, body(&[("b", Value::from(2))]), None).unwrap();
    let ids = txn.commit().await.unwrap();
    assert_eq!(ids.len(), 2);

    assert_eq!(q1.info().await.unwrap().message_count, 1);
    assert_eq!(q2.info().await.unwrap().message_count, 1);
}

/// S6 (approximated) — abandoning a transaction builder without committing
/// publishes nothing.
#[tokio::test]
async fn abandoned_transaction_publishes_nothing() {
    let (_container, service) = common::spawn_service("s6_").await;
    let (q1, _) = service.create_queue_pair("q1").await.unwrap();

    {
        let mut txn = service.transaction();
        txn.send(&q1, body(&[("a", Value::from(1))]), None).unwrap();
        // txn dropped here without calling commit().
    }

    assert_eq!(q1.info().await.unwrap().message_count, 0);
}

struct AlwaysFails;

#[async_trait]
impl Handler for AlwaysFails {
    async fn handle(&self, _body: HashMap<String, Value>) -> Result<(), String> {
        Err("nope".to_string())
    }
}

/// S7 — Router -> Dispatcher -> DLQ on handler exception.
#[tokio::test]
async fn handler_failure_moves_message_to_dlq() {
    let (_container, service) = common::spawn_service("s7_").await;
    let path = "/o/s/";
    let queue_name = Router::normalize_path(path).unwrap();
    let (main, dlq) = service.create_queue_pair(&queue_name).await.unwrap();

    main.publish(body(&[("id", Value::from(1))]), None)
        .await
        .unwrap();

    let mut router = Router::new();
    router
        .register(path, main.clone(), dlq.clone(), Arc::new(AlwaysFails))
        .unwrap();

    let dispatcher = Dispatcher::new(&router);
    let processed = dispatcher.process_once(10, None).await;
    assert_eq!(processed, 1);

    assert_eq!(main.info().await.unwrap().message_count, 0);
    let dlq_messages = dlq.claim(10, None, None).await.unwrap();
    assert_eq!(dlq_messages.len(), 1);
    assert!(dlq_messages[0]
        .error_reason()
        .unwrap()
        .contains("nope"));
}

/// S8 — Graceful stop.
#[tokio::test]
async fn supervisor_stops_within_timeout_while_idle() {
    let (_container, service) = common::spawn_service("s8_").await;
    let (main, dlq) = service.create_queue_pair("idle").await.unwrap();

    struct NoOp;
    #[async_trait]
    impl Handler for NoOp {
        async fn handle(&self, _body: HashMap<String, Value>) -> Result<(), String> {
            Ok(())
        }
    }

    let mut router = Router::new();
    router.register("/idle", main, dlq, Arc::new(NoOp)).unwrap();

    let config = ServiceConfig {
        install_signals: false,
        block_for_seconds: Some(1),
        worker_thread_timeout_secs: 5,
        ..ServiceConfig::default()
    };
    let mut supervisor = Supervisor::new(router, config);
    supervisor.start().await.unwrap();
    assert!(supervisor.is_alive().await);

    let started = std::time::Instant::now();
    supervisor.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(7));
    assert_eq!(supervisor.state().await, SupervisorState::Stopped);
    assert!(!supervisor.is_alive().await);
}
