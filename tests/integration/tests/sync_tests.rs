//! End-to-end sync scenarios.
//!
//! These tests require a running Redis instance (`REDIS_URL`, default
//! `redis://127.0.0.1:6379`). They return early when none is reachable.
//!
//! Run with: `cargo test -p integration-tests --test sync_tests`

use integration_tests::{check_test_env, TestClient, TestHarness};
use std::time::Duration;

/// Poll `cond` until it holds or `timeout` passes.
async fn eventually<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn sync_and_cleanup() {
    if !check_test_env().await {
        return;
    }

    let mut harness = TestHarness::start().await.expect("harness");
    harness.start_worker().await.expect("worker");

    let mut a = TestClient::connect(&harness.ws_url("r1")).await.expect("client a");
    let mut b = TestClient::connect(&harness.ws_url("r1")).await.expect("client b");
    a.drain_for(Duration::from_millis(200)).await;
    b.drain_for(Duration::from_millis(200)).await;

    // A edits; B must observe it.
    let update = a.doc.set("a", "1");
    a.send_update(&update).await.expect("send");
    let target = a.doc.state_vector();
    assert!(
        b.sync_until(&target, Duration::from_secs(3)).await,
        "b never converged on a's edit"
    );

    // The room stream exists while the update is un-compacted.
    assert!(harness.stream_exists("r1").await.expect("exists"));

    // After the drain interval the worker compacts: stream gone, queue
    // drained, exactly one snapshot.
    let lifetime = harness.config.timing.min_message_lifetime();
    assert!(
        eventually(lifetime * 10, || async {
            !harness.stream_exists("r1").await.unwrap_or(true)
        })
        .await,
        "stream was never compacted away"
    );
    assert!(
        eventually(Duration::from_secs(2), || async {
            harness.worker_queue_len().await.unwrap_or(1) == 0
        })
        .await,
        "worker queue never drained"
    );
    assert_eq!(harness.reference_count("r1"), 1);

    // A later subscriber reads the snapshot only and still sees the edit.
    let mut c = TestClient::connect(&harness.ws_url("r1")).await.expect("client c");
    assert!(
        c.sync_until(&target, Duration::from_secs(3)).await,
        "late joiner did not converge from the snapshot"
    );

    // A further edit flows through a recreated stream and a second
    // compaction supersedes the first snapshot.
    let update = a.doc.set("a", "2");
    a.send_update(&update).await.expect("send");
    let target = a.doc.state_vector();
    assert!(
        b.sync_until(&target, lifetime * 2 + Duration::from_secs(1)).await,
        "b never observed the second edit"
    );
    assert!(
        eventually(lifetime * 10, || async { harness.reference_count("r1") == 1 })
            .await,
        "second compaction did not supersede the first snapshot"
    );

    a.close().await;
    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn late_subscriber_catches_up_without_duplicates() {
    if !check_test_env().await {
        return;
    }

    // No worker: the whole history stays in the stream.
    let harness = TestHarness::start().await.expect("harness");

    let mut a = TestClient::connect(&harness.ws_url("r2")).await.expect("client a");
    a.drain_for(Duration::from_millis(200)).await;
    for i in 0..100 {
        let update = a.doc.set(&format!("k{i}"), "v");
        a.send_update(&update).await.expect("send");
    }
    let target = a.doc.state_vector();
    a.drain_for(Duration::from_millis(200)).await;
    a.close().await;

    let mut b = TestClient::connect(&harness.ws_url("r2")).await.expect("client b");
    assert!(
        b.sync_until(&target, Duration::from_secs(5)).await,
        "late subscriber did not reach the writer's final state"
    );

    // The catch-up is one merged sync-step-2, not a replay of 100 entries,
    // and nothing is delivered twice.
    b.drain_for(Duration::from_millis(300)).await;
    assert_eq!(b.updates_applied(), 1);
}

#[tokio::test]
async fn two_gateways_fan_out_once() {
    if !check_test_env().await {
        return;
    }

    let harness = TestHarness::start().await.expect("harness");
    let second = harness.spawn_gateway().await.expect("second gateway");

    let mut a = TestClient::connect(&harness.ws_url("r3")).await.expect("client a");
    let mut b = TestClient::connect(&TestHarness::ws_url_at(second, "r3"))
        .await
        .expect("client b");
    a.drain_for(Duration::from_millis(200)).await;
    b.drain_for(Duration::from_millis(200)).await;

    let update = a.doc.set("x", "1");
    a.send_update(&update).await.expect("send");
    let target = a.doc.state_vector();

    assert!(
        b.sync_until(&target, Duration::from_secs(3)).await,
        "update never crossed gateways"
    );

    // The origin must not receive its own update back.
    a.drain_for(Duration::from_millis(500)).await;
    assert_eq!(a.updates_applied(), 1, "origin saw its own update echoed");

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn awareness_is_broadcast_but_never_persisted() {
    if !check_test_env().await {
        return;
    }

    let harness = TestHarness::start().await.expect("harness");

    let mut a = TestClient::connect(&harness.ws_url("r4")).await.expect("client a");
    let mut b = TestClient::connect(&harness.ws_url("r4")).await.expect("client b");
    a.drain_for(Duration::from_millis(200)).await;
    b.drain_for(Duration::from_millis(200)).await;

    // Some document state, then an awareness blob.
    let update = a.doc.set("doc", "content");
    a.send_update(&update).await.expect("send");
    a.send_awareness(b"cursor:3:14").await.expect("awareness");

    let target = a.doc.state_vector();
    assert!(b.sync_until(&target, Duration::from_secs(3)).await);
    b.drain_for(Duration::from_millis(500)).await;
    assert!(
        !b.awareness_seen().is_empty(),
        "peer never saw the awareness frame"
    );

    a.close().await;
    b.close().await;

    // Reconnect: document state survives, awareness does not.
    let mut c = TestClient::connect(&harness.ws_url("r4")).await.expect("client c");
    assert!(c.sync_until(&target, Duration::from_secs(3)).await);
    c.drain_for(Duration::from_millis(300)).await;
    assert!(c.awareness_seen().is_empty(), "awareness was persisted");
    c.close().await;
}
