//! Worker queue and crash-recovery scenarios.
//!
//! These tests require a running Redis instance; they return early when
//! none is reachable.
//!
//! Run with: `cargo test -p integration-tests --test worker_tests`

use collab_storage::Storage;
use collab_streams::{KeyScheme, RedisPool, WorkerQueue};
use integration_tests::{check_test_env, redis_url, TestClient, TestHarness};
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn stale_claims_are_reclaimed_by_peers() {
    if !check_test_env().await {
        return;
    }

    let prefix = format!("t{}", Uuid::new_v4().simple());
    let pool = RedisPool::new(&redis_url(), 4).expect("pool");
    let keys = KeyScheme::new(prefix);

    // Two consumers, 150 ms claim TTL.
    let dead = WorkerQueue::new(pool.clone(), keys.clone(), "c-dead", 100, 150);
    let live = WorkerQueue::new(pool, keys.clone(), "c-live", 100, 150);
    dead.ensure_group().await.expect("group");

    dead.enqueue("q:room:r1:index").await.expect("enqueue");

    // The first consumer claims and "crashes" (never acks).
    let task = dead.claim_next().await.expect("claim").expect("task");
    assert_eq!(task.room_key, "q:room:r1:index");
    assert!(dead.still_claimed(task.id).await.expect("pending"));
    assert!(!live.still_claimed(task.id).await.expect("pending"));

    // Past the TTL the peer reclaims the very same task.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let reclaimed = live.claim_next().await.expect("reclaim").expect("task");
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.room_key, task.room_key);
    assert!(live.still_claimed(reclaimed.id).await.expect("pending"));
    assert!(!dead.still_claimed(task.id).await.expect("pending"));

    live.ack(reclaimed.id).await.expect("ack");
    assert_eq!(live.len().await.expect("len"), 0);
}

#[tokio::test]
async fn crashed_compaction_is_reclaimed_and_orphan_deleted() {
    if !check_test_env().await {
        return;
    }

    let mut harness = TestHarness::start().await.expect("harness");

    // A client leaves one update in the stream.
    let mut a = TestClient::connect(&harness.ws_url("r1")).await.expect("client");
    a.drain_for(Duration::from_millis(200)).await;
    let update = a.doc.set("a", "1");
    a.send_update(&update).await.expect("send");
    a.drain_for(Duration::from_millis(200)).await;
    let full_state = a.doc.encode_full();
    a.close().await;

    // A "worker" claims the task, persists its snapshot, and dies before
    // trimming or acking.
    let pool = RedisPool::new(&redis_url(), 4).expect("pool");
    let dead = WorkerQueue::new(
        pool,
        harness.keys.clone(),
        "c-dead",
        100,
        harness.config.timing.worker_timeout_ms,
    );
    dead.ensure_group().await.expect("group");
    let _stuck_task = dead.claim_next().await.expect("claim").expect("task");
    harness
        .storage
        .persist_doc("r1", "index", &full_state)
        .await
        .expect("orphan persist");
    assert_eq!(harness.reference_count("r1"), 1);

    // A real worker reclaims after the TTL, completes the compaction and
    // deletes the orphan reference.
    harness.start_worker().await.expect("worker");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
    loop {
        let stream_gone = !harness.stream_exists("r1").await.unwrap_or(true);
        let one_ref = harness.reference_count("r1") == 1;
        let queue_empty = harness.worker_queue_len().await.unwrap_or(1) == 0;
        if stream_gone && one_ref && queue_empty {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "recovery never completed: stream_gone={stream_gone} one_ref={one_ref} queue_empty={queue_empty}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Idempotence: re-running the compaction on the quiescent room changes
    // nothing.
    dead.enqueue(&harness.keys.room_stream(&collab_core::room::RoomId::index("r1")))
        .await
        .expect("re-enqueue");
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(harness.reference_count("r1"), 1);
    assert!(!harness.stream_exists("r1").await.expect("exists"));
    assert_eq!(harness.worker_queue_len().await.expect("len"), 0);
}
