//! In-memory database backend.
//!
//! [`MockDatabase`] is cheap to clone; clones share the script and counters,
//! so a test keeps one clone for inspection and hands another to the pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbcontrol::backend::{
    Cursor, Database, Driver, PreparedStatement, RowSource, TransactionHandle,
};
use dbcontrol::{Column, ExecResult, IsolationLevel, Result, Value};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cursor::{MockCursor, MockRowSource};
use crate::error::MockError;
use crate::statement::MockStatement;
use crate::transaction::MockTransaction;

/// A gate that holds scripted statements until opened.
#[derive(Debug, Clone)]
pub struct Latch {
    open: Arc<watch::Sender<bool>>,
}

impl Latch {
    /// Create a closed latch.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { open: Arc::new(tx) }
    }

    /// Let every current and future waiter through.
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    /// Returns true once [`open`](Self::open) was called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until the latch is opened.
    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as `self`, so this only ends once open.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResultSet {
    pub(crate) columns: Arc<[Column]>,
    pub(crate) rows: Vec<Vec<Value>>,
}

impl Default for ResultSet {
    fn default() -> Self {
        Self {
            columns: Column::from_names(std::iter::empty::<&str>()),
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    results: HashMap<String, ResultSet>,
    exec_results: HashMap<String, ExecResult>,
    failures: HashMap<String, String>,
    cursor_failures: HashSet<String>,
    latches: HashMap<String, Latch>,
    latency: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    pub(crate) commits: AtomicUsize,
    pub(crate) rollbacks: AtomicUsize,
    pub(crate) cursor_closes: AtomicUsize,
    pub(crate) statement_closes: AtomicUsize,
}

/// State shared by a database and everything opened from it.
#[derive(Debug, Default)]
pub(crate) struct State {
    script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    pub(crate) counters: Counters,
    max_idle: Mutex<Option<usize>>,
    closed: AtomicBool,
}

impl State {
    pub(crate) fn record(&self, call: impl Into<String>) {
        let call = call.into();
        tracing::trace!(call = %call, "mock backend call");
        self.calls.lock().push(call);
    }

    pub(crate) fn failure(&self, key: &str) -> Option<MockError> {
        self.script
            .lock()
            .failures
            .get(key)
            .map(|msg| MockError::Scripted(msg.clone()))
    }

    /// Start an operation: record it, apply latency and latches, then fail it
    /// if scripted to. The returned guard counts the operation as in flight.
    pub(crate) async fn enter(self: &Arc<Self>, call: String, key: &str) -> Result<InFlight> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MockError::Closed.into());
        }
        self.record(call);
        let guard = InFlight::new(Arc::clone(self));

        let (latency, latch) = {
            let script = self.script.lock();
            (script.latency, script.latches.get(key).cloned())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(latch) = latch {
            latch.wait().await;
        }

        match self.failure(key) {
            Some(err) => Err(err.into()),
            None => Ok(guard),
        }
    }

    fn exec_result(&self, sql: &str) -> ExecResult {
        self.script
            .lock()
            .exec_results
            .get(sql)
            .copied()
            .unwrap_or_default()
    }

    fn result_set(&self, sql: &str) -> (ResultSet, bool) {
        let script = self.script.lock();
        (
            script.results.get(sql).cloned().unwrap_or_default(),
            script.cursor_failures.contains(sql),
        )
    }
}

/// Marks one operation as active against the backend.
#[derive(Debug)]
pub(crate) struct InFlight {
    state: Arc<State>,
}

impl InFlight {
    fn new(state: Arc<State>) -> Self {
        let now = state.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        state.counters.peak.fetch_max(now, Ordering::AcqRel);
        Self { state }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) async fn run_exec(state: &Arc<State>, kind: &str, sql: &str) -> Result<ExecResult> {
    let _guard = state.enter(format!("{kind}:{sql}"), sql).await?;
    Ok(state.exec_result(sql))
}

pub(crate) async fn run_query(state: &Arc<State>, kind: &str, sql: &str) -> Result<Box<dyn Cursor>> {
    let guard = state.enter(format!("{kind}:{sql}"), sql).await?;
    let (set, fail_read) = state.result_set(sql);
    Ok(Box::new(MockCursor::new(Arc::clone(state), set, fail_read, guard)))
}

pub(crate) async fn run_query_row(
    state: &Arc<State>,
    kind: &str,
    sql: &str,
) -> Result<Box<dyn RowSource>> {
    let _guard = state.enter(format!("{kind}:{sql}"), sql).await?;
    let (set, _) = state.result_set(sql);
    Ok(Box::new(MockRowSource::first_of(set)))
}

/// Scriptable in-memory database.
///
/// Statements are matched by their exact SQL text. Unscripted queries return
/// no rows and unscripted statements affect no rows.
///
/// Operations other than plain statements are scripted under fixed keys:
/// `PING`, `BEGIN`, `COMMIT`, `ROLLBACK` and `PREPARE <sql>`.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<State>,
}

impl MockDatabase {
    /// Create an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Box a clone of this database for handing to a pool.
    #[must_use]
    pub fn boxed(&self) -> Box<dyn Database> {
        Box::new(self.clone())
    }

    /// Script the result set returned for `sql`.
    pub fn script_rows<I, S>(&self, sql: &str, columns: I, rows: Vec<Vec<Value>>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = ResultSet {
            columns: Column::from_names(columns),
            rows,
        };
        self.state.script.lock().results.insert(sql.to_string(), set);
    }

    /// Script the outcome of executing `sql`.
    pub fn script_exec(&self, sql: &str, rows_affected: u64, last_insert_id: Option<i64>) {
        self.state.script.lock().exec_results.insert(
            sql.to_string(),
            ExecResult {
                rows_affected,
                last_insert_id,
            },
        );
    }

    /// Make every operation on `key` fail with `message`.
    pub fn fail(&self, key: &str, message: &str) {
        self.state
            .script
            .lock()
            .failures
            .insert(key.to_string(), message.to_string());
    }

    /// Stop failing operations on `key`.
    pub fn succeed(&self, key: &str) {
        self.state.script.lock().failures.remove(key);
    }

    /// Make cursors for `sql` fail on their first read.
    pub fn fail_cursor(&self, sql: &str) {
        self.state
            .script
            .lock()
            .cursor_failures
            .insert(sql.to_string());
    }

    /// Hold every operation on `key` until the returned latch is opened.
    #[must_use]
    pub fn hold(&self, key: &str) -> Latch {
        let latch = Latch::new();
        self.state
            .script
            .lock()
            .latches
            .insert(key.to_string(), latch.clone());
        latch
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.script.lock().latency = latency;
    }

    /// Operations currently active against the backend.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.counters.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously active operations seen.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.state.counters.peak.load(Ordering::Acquire)
    }

    /// Wait until at least `n` operations are active.
    pub async fn wait_for_in_flight(&self, n: usize) {
        while self.in_flight() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Number of commits received.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.state.counters.commits.load(Ordering::Acquire)
    }

    /// Number of rollbacks received.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.state.counters.rollbacks.load(Ordering::Acquire)
    }

    /// Number of cursor close calls received.
    #[must_use]
    pub fn cursor_closes(&self) -> usize {
        self.state.counters.cursor_closes.load(Ordering::Acquire)
    }

    /// Number of statement close calls received.
    #[must_use]
    pub fn statement_closes(&self) -> usize {
        self.state.counters.statement_closes.load(Ordering::Acquire)
    }

    /// Every call received, in order, as `kind:sql`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().clone()
    }

    /// Number of calls whose label starts with `prefix`.
    #[must_use]
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Idle connection limit last set on the backend.
    #[must_use]
    pub fn max_idle_conns(&self) -> Option<usize> {
        *self.state.max_idle.lock()
    }

    /// Returns true once the database was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Database for MockDatabase {
    fn set_max_idle_conns(&self, n: usize) {
        self.state.record(format!("set_max_idle_conns:{n}"));
        *self.state.max_idle.lock() = Some(n);
    }

    async fn ping(&self) -> Result<()> {
        let _guard = self.state.enter("ping".to_string(), "PING").await?;
        Ok(())
    }

    async fn exec(&self, sql: &str, _params: &[Value]) -> Result<ExecResult> {
        run_exec(&self.state, "exec", sql).await
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Box<dyn Cursor>> {
        run_query(&self.state, "query", sql).await
    }

    async fn query_row(&self, sql: &str, _params: &[Value]) -> Result<Box<dyn RowSource>> {
        run_query_row(&self.state, "query_row", sql).await
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let _guard = self
            .state
            .enter(format!("prepare:{sql}"), &format!("PREPARE {sql}"))
            .await?;
        Ok(Box::new(MockStatement::new(Arc::clone(&self.state), sql, false)))
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn TransactionHandle>> {
        let guard = self
            .state
            .enter(format!("begin:{isolation:?}"), "BEGIN")
            .await?;
        Ok(Box::new(MockTransaction::new(Arc::clone(&self.state), guard)))
    }

    async fn close(&self) -> Result<()> {
        self.state.record("close");
        self.state.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Driver handing out clones of one [`MockDatabase`].
#[derive(Debug, Clone)]
pub struct MockDriver {
    name: String,
    db: MockDatabase,
}

impl MockDriver {
    /// Create a driver named `mock`.
    #[must_use]
    pub fn new(db: MockDatabase) -> Self {
        Self::named("mock", db)
    }

    /// Create a driver with a custom name.
    #[must_use]
    pub fn named(name: &str, db: MockDatabase) -> Self {
        Self {
            name: name.to_string(),
            db,
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, dsn: &str) -> Result<Box<dyn Database>> {
        self.db.state.record(format!("open:{dsn}"));
        Ok(self.db.boxed())
    }
}
