//! Block-duration reporting and usage-timeout diagnostics.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use dbcontrol::Pool;
use dbcontrol_testing::{MockDatabase, init_tracing};
use tokio::sync::mpsc;
use tokio::time::timeout;

const READY: Duration = Duration::from_secs(2);

// =============================================================================
// Block duration
// =============================================================================

#[tokio::test]
async fn test_one_blocked_acquisition_reports_one_duration() {
    init_tracing();
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_block_duration_channel(Some(tx)).await;

    let hold = Duration::from_millis(150);
    let mut txn = pool.begin().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.exec("SELECT 1", &[]).await })
    };
    tokio::time::sleep(hold).await;
    txn.commit().await.unwrap();
    timeout(READY, waiter).await.unwrap().unwrap().unwrap();

    let waited = timeout(READY, rx.recv()).await.unwrap().unwrap();
    assert!(waited >= hold - Duration::from_millis(20), "waited {waited:?}");
    assert!(waited < READY, "waited {waited:?}");
    assert!(rx.try_recv().is_err(), "expected exactly one report");

    let metrics = pool.metrics();
    assert_eq!(metrics.admissions_blocked, 1);
    assert_eq!(metrics.admissions_granted, 2);
    assert!(metrics.total_block_time >= hold - Duration::from_millis(20));
    assert!((metrics.block_rate() - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_unblocked_acquisitions_report_nothing() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(2).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_block_duration_channel(Some(tx)).await;

    for _ in 0..5 {
        pool.exec("SELECT 1", &[]).await.unwrap();
    }
    pool.ping().await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_replacing_block_channel_closes_the_previous_one() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let (first, mut first_rx) = mpsc::channel(1);
    pool.set_block_duration_channel(Some(first)).await;
    let (second, _second_rx) = mpsc::channel(1);
    pool.set_block_duration_channel(Some(second)).await;
    assert!(timeout(READY, first_rx.recv()).await.unwrap().is_none());

    pool.set_block_duration_channel(None).await;
    let mut txn = pool.begin().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.exec("SELECT 1", &[]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    txn.rollback().await.unwrap();

    // With reporting disabled the blocked call must not stall on a send.
    timeout(READY, waiter).await.unwrap().unwrap().unwrap();
}

// =============================================================================
// Usage timeout
// =============================================================================

#[tokio::test]
async fn test_holding_past_timeout_reports_stack_once() {
    init_tracing();
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_usage_timeout(Some(tx), Duration::from_millis(50)).await;

    let mut txn = pool.begin().await.unwrap();
    let stack = timeout(READY, rx.recv()).await.unwrap().unwrap();
    assert!(!stack.trim().is_empty());
    assert!(!stack.contains("disabled backtrace"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err(), "expected exactly one diagnostic");

    // The holder is not interrupted.
    assert!(txn.holds_admission());
    txn.commit().await.unwrap();
    assert_eq!(pool.metrics().usage_timeouts_reported, 1);
}

#[tokio::test]
async fn test_release_before_timeout_reports_nothing() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_usage_timeout(Some(tx), Duration::from_millis(300)).await;

    pool.exec("SELECT 1", &[]).await.unwrap();
    let mut txn = pool.begin().await.unwrap();
    txn.commit().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(pool.metrics().usage_timeouts_reported, 0);
}

#[tokio::test]
async fn test_open_cursor_past_timeout_is_reported() {
    let db = MockDatabase::new();
    db.script_rows("SELECT 1", ["one"], vec![vec![1i64.into()]]);
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_usage_timeout(Some(tx), Duration::from_millis(50)).await;

    let mut rows = pool.query("SELECT 1", &[]).await.unwrap();
    assert!(timeout(READY, rx.recv()).await.unwrap().is_some());
    rows.close().await.unwrap();
}

#[tokio::test]
async fn test_disabling_usage_timeout_drops_channel() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_usage_timeout(Some(tx), Duration::from_millis(50)).await;
    pool.set_usage_timeout(None, Duration::from_millis(50)).await;

    let mut txn = pool.begin().await.unwrap();
    // The only sender was dropped, so the channel reports closed instead of
    // delivering a diagnostic.
    assert!(timeout(READY, rx.recv()).await.unwrap().is_none());
    txn.rollback().await.unwrap();
}

#[tokio::test]
async fn test_unlimited_pool_still_monitors_usage() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(0).wrap(db.boxed());
    let (tx, mut rx) = mpsc::channel(4);
    pool.set_usage_timeout(Some(tx), Duration::from_millis(50)).await;

    let mut txn = pool.begin().await.unwrap();
    assert!(timeout(READY, rx.recv()).await.unwrap().is_some());
    txn.commit().await.unwrap();
}
