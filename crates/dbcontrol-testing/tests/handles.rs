//! Release triggers of cursors, statements and transactions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use dbcontrol::{Error, IsolationLevel, Pool, Value};
use dbcontrol_testing::{MockDatabase, init_tracing};
use futures_util::TryStreamExt;
use tokio::time::timeout;

const BLOCKED: Duration = Duration::from_millis(100);
const READY: Duration = Duration::from_secs(2);

const USERS: &str = "SELECT id, name FROM users ORDER BY id";

fn users_db() -> MockDatabase {
    let db = MockDatabase::new();
    db.script_rows(
        USERS,
        ["id", "name"],
        vec![
            vec![Value::Int(1), Value::from("ada")],
            vec![Value::Int(2), Value::from("grace")],
        ],
    );
    db
}

async fn assert_free(pool: &Pool) {
    timeout(BLOCKED, pool.exec("SELECT 1", &[]))
        .await
        .expect("pool should have a free admission")
        .unwrap();
}

async fn assert_exhausted(pool: &Pool) {
    assert!(
        timeout(BLOCKED, pool.exec("SELECT 1", &[])).await.is_err(),
        "pool should have no free admission"
    );
}

// =============================================================================
// Rows
// =============================================================================

#[tokio::test]
async fn test_drain_then_close_releases_once() {
    init_tracing();
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    for _ in 0..2 {
        let mut rows = timeout(BLOCKED, pool.query(USERS, &[]))
            .await
            .expect("previous cursor did not release")
            .unwrap();
        assert!(rows.holds_admission());
        assert_exhausted(&pool).await;

        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get_by_name::<String>("name").unwrap());
        }
        assert_eq!(names, ["ada", "grace"]);
        assert!(!rows.holds_admission());
        assert!(rows.is_closed());

        rows.close().await.unwrap();
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.status().available, Some(1));
    }

    // Close still reaches the backend after exhaustion.
    assert_eq!(db.cursor_closes(), 2);
}

#[tokio::test]
async fn test_next_after_end_stays_at_end() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut rows = pool.query(USERS, &[]).await.unwrap();
    while rows.next().await.unwrap().is_some() {}
    assert!(rows.next().await.unwrap().is_none());
    assert_eq!(pool.status().available, Some(1));
}

#[tokio::test]
async fn test_early_close_releases_and_repeated_close_forwards() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut rows = pool.query(USERS, &[]).await.unwrap();
    let first = rows.next().await.unwrap().unwrap();
    assert_eq!(first.get::<i64>(0).unwrap(), 1);

    rows.close().await.unwrap();
    assert_free(&pool).await;

    rows.close().await.unwrap();
    assert_eq!(db.cursor_closes(), 2);
    assert_eq!(pool.status().available, Some(1));
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_dropped_cursor_releases() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let rows = pool.query(USERS, &[]).await.unwrap();
    assert_exhausted(&pool).await;
    drop(rows);
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_read_error_keeps_admission_until_close() {
    let db = users_db();
    db.fail_cursor(USERS);
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut rows = pool.query(USERS, &[]).await.unwrap();
    assert!(rows.next().await.is_err());
    assert!(rows.holds_admission());
    assert_eq!(pool.status().in_use, 1);

    rows.close().await.unwrap();
    assert!(!rows.holds_admission());
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_cursor_columns_and_collect() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let rows = pool.query(USERS, &[]).await.unwrap();
    let names: Vec<_> = rows.columns().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, ["id", "name"]);

    let all = rows.collect().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].get::<String>(1).unwrap(), "grace");
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_cursor_stream_releases_at_end() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let rows = pool.query(USERS, &[]).await.unwrap();
    let all: Vec<_> = rows.into_stream().try_collect().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_free(&pool).await;
}

// =============================================================================
// QueryRow
// =============================================================================

#[tokio::test]
async fn test_query_row_holds_until_scan() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let row = pool.query_row(USERS, &[]).await;
    assert!(row.holds_admission());
    assert_exhausted(&pool).await;

    let id: i64 = row.scan_as().await.unwrap();
    assert_eq!(id, 1);
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_query_row_no_rows_still_releases() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let row = pool.query_row("SELECT id FROM users WHERE id = -1", &[]).await;
    assert!(matches!(row.scan().await, Err(Error::NoRows)));
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_unscanned_query_row_releases_on_drop() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    drop(pool.query_row(USERS, &[]).await);
    assert_free(&pool).await;
}

// =============================================================================
// Statements
// =============================================================================

#[tokio::test]
async fn test_statement_acquires_per_invocation() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let stmt = pool.prepare(USERS).await.unwrap();
    assert!(!stmt.is_transactional());
    assert_eq!(stmt.sql(), USERS);
    assert_eq!(pool.status().in_use, 0);

    stmt.exec(&[]).await.unwrap();
    assert_eq!(pool.status().in_use, 0);

    let rows = stmt.query(&[]).await.unwrap();
    assert!(timeout(BLOCKED, stmt.exec(&[])).await.is_err());
    drop(rows);

    let row = stmt.query_row(&[]).await;
    assert!(row.holds_admission());
    assert_eq!(row.scan().await.unwrap().get::<String>(1).unwrap(), "ada");

    timeout(BLOCKED, stmt.exec(&[])).await.unwrap().unwrap();
    assert_eq!(db.call_count("stmt.exec:"), 2);
}

#[tokio::test]
async fn test_closed_statement_reports_and_releases() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let stmt = pool.prepare(USERS).await.unwrap();
    stmt.close().await.unwrap();
    assert_eq!(db.statement_closes(), 1);

    assert!(matches!(stmt.exec(&[]).await, Err(Error::StatementClosed)));
    assert_free(&pool).await;
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_transaction_holds_one_token_throughout() {
    init_tracing();
    let db = users_db();
    db.script_exec("INSERT INTO audit (msg) VALUES ($1)", 1, Some(42));
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut tx = pool.begin().await.unwrap();
    assert!(tx.holds_admission());

    for _ in 0..3 {
        let result = timeout(
            BLOCKED,
            tx.exec("INSERT INTO audit (msg) VALUES ($1)", &[Value::from("hi")]),
        )
        .await
        .expect("statement inside transaction blocked")
        .unwrap();
        assert_eq!(result.last_insert_id, Some(42));
    }

    let stmt = timeout(BLOCKED, tx.prepare(USERS)).await.unwrap().unwrap();
    assert!(stmt.is_transactional());
    timeout(BLOCKED, stmt.exec(&[])).await.unwrap().unwrap();
    let rows = timeout(BLOCKED, stmt.query(&[])).await.unwrap().unwrap();
    assert_eq!(rows.collect().await.unwrap().len(), 2);

    let rows = timeout(BLOCKED, tx.query(USERS, &[])).await.unwrap().unwrap();
    assert!(!rows.holds_admission());
    drop(rows);
    let row = timeout(BLOCKED, tx.query_row(USERS, &[])).await.unwrap();
    assert_eq!(row.scan_as::<i64>().await.unwrap(), 1);

    // Outside the transaction the pool is exhausted the whole time.
    assert_exhausted(&pool).await;
    assert_eq!(pool.status().in_use, 1);

    tx.commit().await.unwrap();
    assert!(tx.is_closed());
    assert!(!tx.holds_admission());
    assert_eq!(db.commits(), 1);
    assert_free(&pool).await;
    assert_eq!(pool.metrics().admissions_granted, 2);
}

#[tokio::test]
async fn test_second_commit_forwards_but_does_not_release() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut tx = pool.begin().await.unwrap();
    tx.commit().await.unwrap();
    assert!(matches!(tx.commit().await, Err(Error::TxDone)));
    assert!(matches!(tx.rollback().await, Err(Error::TxDone)));
    assert_eq!(db.call_count("commit"), 2);
    assert_eq!(db.call_count("rollback"), 1);

    assert_eq!(pool.status().available, Some(1));
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_failed_commit_still_releases() {
    let db = MockDatabase::new();
    db.fail("COMMIT", "serialization failure");
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut tx = pool.begin().await.unwrap();
    assert!(tx.commit().await.is_err());
    assert!(tx.is_closed());
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_rollback_releases() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let mut tx = pool.begin().await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(db.rollbacks(), 1);
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_dropped_transaction_releases() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let tx = pool.begin().await.unwrap();
    drop(tx);
    assert_free(&pool).await;
}

#[tokio::test]
async fn test_pool_statement_rebound_to_transaction() {
    let db = users_db();
    let pool = Pool::builder().concurrency(1).wrap(db.boxed());

    let stmt = pool.prepare(USERS).await.unwrap();
    let mut tx = pool.begin().await.unwrap();

    // The pool statement needs its own admission; the rebound one does not.
    assert!(timeout(BLOCKED, stmt.exec(&[])).await.is_err());
    let bound = tx.stmt(&stmt).await.unwrap();
    assert!(bound.is_transactional());
    timeout(BLOCKED, bound.exec(&[])).await.unwrap().unwrap();
    assert_eq!(db.call_count("tx.stmt.exec:"), 1);

    tx.commit().await.unwrap();
    timeout(READY, stmt.exec(&[])).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_begin_with_isolation_level() {
    let db = MockDatabase::new();
    let pool = Pool::builder().concurrency(2).wrap(db.boxed());

    let mut tx = pool.begin_with(IsolationLevel::Serializable).await.unwrap();
    assert_eq!(tx.isolation_level(), IsolationLevel::Serializable);
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    assert_eq!(tx.isolation_level(), IsolationLevel::ReadCommitted);
    tx.rollback().await.unwrap();

    assert!(db.calls().contains(&"begin:Serializable".to_string()));
}
