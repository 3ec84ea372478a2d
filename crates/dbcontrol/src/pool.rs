//! Admission-controlled database pool.
//!
//! [`Pool`] wraps a backend [`Database`] handle and routes every operation
//! through the admission gate before forwarding it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::backend::{Database, Driver};
use crate::config::PoolConfig;
use crate::cursor::{QueryRow, Rows};
use crate::error::Result;
use crate::gate::Gate;
use crate::instrumentation::{SanitizationConfig, extract_operation, span_names};
use crate::registry::DriverRegistry;
use crate::row::ExecResult;
use crate::statement::Statement;
use crate::transaction::{IsolationLevel, Transaction};
use crate::value::Value;

/// A database handle with a bounded number of concurrently active operations.
///
/// The capacity is fixed when the pool is created. Once every admission is
/// taken, further operations wait until one is returned. There is no timeout
/// on that wait.
///
/// One-shot operations ([`ping`](Self::ping), [`exec`](Self::exec),
/// [`prepare`](Self::prepare)) hold their admission for the duration of the
/// call. Cursors and transactions hold it until they finish; see [`Rows`],
/// [`QueryRow`] and [`Transaction`].
///
/// Cloning a pool is cheap; clones share capacity and settings.
///
/// # Example
///
/// ```rust,ignore
/// use dbcontrol::{Pool, Value};
///
/// let pool = Pool::builder()
///     .concurrency(10)
///     .connect(driver.as_ref(), "postgres://localhost/app")
///     .await?;
///
/// let mut rows = pool.query("SELECT id, name FROM customers", &[]).await?;
/// while let Some(row) = rows.next().await? {
///     let id: i64 = row.get(0)?;
///     let name: String = row.get(1)?;
///     println!("{id} {name}");
/// }
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    db: Box<dyn Database>,
    gate: Arc<Gate>,
    sanitization: SanitizationConfig,
    created_at: Instant,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Open a pool through a driver from the process-wide registry, using the
    /// process-wide concurrency setting.
    pub async fn open(driver: &str, dsn: &str) -> Result<Self> {
        PoolBuilder::new()
            .pool_config(PoolConfig::from_global())
            .open(driver, dsn)
            .await
    }

    /// Wrap an already open database handle, using the process-wide
    /// concurrency setting.
    #[must_use]
    pub fn wrap(db: Box<dyn Database>) -> Self {
        PoolBuilder::new()
            .pool_config(PoolConfig::from_global())
            .wrap(db)
    }

    fn from_parts(db: Box<dyn Database>, config: PoolConfig, sanitization: SanitizationConfig) -> Self {
        if config.is_bounded() {
            // Keep as many idle connections as may be active at once, so the
            // backend does not discard connections only to dial them again.
            db.set_max_idle_conns(config.concurrency);
        }

        tracing::info!(max_conns = config.concurrency, "database pool opened");

        Self {
            inner: Arc::new(PoolInner {
                db,
                gate: Arc::new(Gate::new(config.concurrency)),
                sanitization,
                created_at: Instant::now(),
            }),
        }
    }

    /// Maximum number of concurrently active operations, `0` if unlimited.
    #[must_use]
    pub fn max_conns(&self) -> usize {
        self.inner.gate.max_conns()
    }

    /// Limit idle connections in the backend.
    ///
    /// Only applies to unlimited pools. Bounded pools keep as many idle
    /// connections as their capacity and ignore this call.
    pub fn set_max_idle_conns(&self, n: usize) {
        if self.inner.gate.is_bounded() {
            tracing::debug!(
                requested = n,
                max_conns = self.max_conns(),
                "ignoring idle connection limit on bounded pool"
            );
            return;
        }
        self.inner.db.set_max_idle_conns(n);
    }

    /// Set the channel receiving the wait time of every blocked admission.
    ///
    /// The previously set channel is closed (its sender dropped); `None`
    /// disables reporting. Safe to call while operations are in flight.
    ///
    /// Sends wait for channel capacity. Keep the receiver drained, or blocked
    /// operations stall on the report.
    pub async fn set_block_duration_channel(&self, channel: Option<mpsc::Sender<Duration>>) {
        self.inner.gate.reporter().set(channel).await;
    }

    /// Report operations that hold their admission longer than `timeout`.
    ///
    /// Each admission granted afterwards starts a timer; if the admission is
    /// still held when it expires, the backtrace captured at acquisition is
    /// sent to `channel`. The operation itself is not affected.
    ///
    /// Timeout changes apply to new admissions only. The channel change is
    /// immediate: once this returns the previous channel is not used again.
    /// `None` disables reporting and stops new timers from being started.
    pub async fn set_usage_timeout(&self, channel: Option<mpsc::Sender<String>>, timeout: Duration) {
        self.inner.gate.monitor().configure(channel, timeout).await;
    }

    /// Verify the database is reachable.
    pub async fn ping(&self) -> Result<()> {
        async {
            let mut admission = self.inner.gate.acquire().await?;
            let result = self.inner.db.ping().await;
            admission.release();
            result
        }
        .instrument(tracing::debug_span!(span_names::PING))
        .await
    }

    /// Execute a statement that does not return rows.
    pub async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let span = tracing::debug_span!(
            span_names::EXEC,
            operation = extract_operation(sql),
            statement = %self.inner.sanitization.sanitize(sql),
            params_count = params.len(),
        );
        async {
            let mut admission = self.inner.gate.acquire().await?;
            let result = self.inner.db.exec(sql, params).await;
            admission.release();
            result
        }
        .instrument(span)
        .await
    }

    /// Execute a query returning rows.
    ///
    /// The returned [`Rows`] holds the admission until exhausted or closed. If
    /// the query fails, the admission is released before the error is
    /// returned.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        let span = tracing::debug_span!(
            span_names::QUERY,
            operation = extract_operation(sql),
            statement = %self.inner.sanitization.sanitize(sql),
            params_count = params.len(),
        );
        async {
            let mut admission = self.inner.gate.acquire().await?;
            match self.inner.db.query(sql, params).await {
                Ok(cursor) => Ok(Rows::new(cursor, admission)),
                Err(e) => {
                    admission.release();
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Execute a query expected to return at most one row.
    ///
    /// Errors surface from [`QueryRow::scan`]. The admission is held until
    /// then, unless the query already failed.
    pub async fn query_row(&self, sql: &str, params: &[Value]) -> QueryRow {
        let span = tracing::debug_span!(
            span_names::QUERY_ROW,
            operation = extract_operation(sql),
            statement = %self.inner.sanitization.sanitize(sql),
            params_count = params.len(),
        );
        async {
            match self.inner.gate.acquire().await {
                Ok(admission) => {
                    QueryRow::new(self.inner.db.query_row(sql, params).await, admission)
                }
                Err(e) => QueryRow::failed(e),
            }
        }
        .instrument(span)
        .await
    }

    /// Prepare a statement. The admission is held only while preparing.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        let span = tracing::debug_span!(
            span_names::PREPARE,
            statement = %self.inner.sanitization.sanitize(sql),
        );
        async {
            let mut admission = self.inner.gate.acquire().await?;
            let result = self.inner.db.prepare(sql).await;
            admission.release();
            Ok(Statement::new(result?, Some(Arc::clone(&self.inner.gate))))
        }
        .instrument(span)
        .await
    }

    /// Begin a transaction with the default isolation level.
    pub async fn begin(&self) -> Result<Transaction> {
        self.begin_with(IsolationLevel::default()).await
    }

    /// Begin a transaction.
    ///
    /// The transaction holds one admission until committed or rolled back.
    pub async fn begin_with(&self, isolation: IsolationLevel) -> Result<Transaction> {
        async {
            let mut admission = self.inner.gate.acquire().await?;
            match self.inner.db.begin(isolation).await {
                Ok(tx) => Ok(Transaction::new(tx, admission, isolation)),
                Err(e) => {
                    admission.release();
                    Err(e)
                }
            }
        }
        .instrument(tracing::debug_span!(
            span_names::BEGIN_TRANSACTION,
            isolation = ?isolation
        ))
        .await
    }

    /// Close the pool and the backend handle.
    ///
    /// Operations waiting for admission fail with
    /// [`Error::PoolClosed`](crate::Error::PoolClosed), as do later ones.
    /// Handles still holding an admission are left to finish.
    pub async fn close(&self) -> Result<()> {
        self.inner.gate.close();
        tracing::info!("database pool closed");
        self.inner.db.close().await
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.gate.is_closed()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            available: self.inner.gate.available(),
            in_use: self.inner.gate.outstanding(),
            max: self.inner.gate.max_conns(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let counters = self.inner.gate.counters();
        PoolMetrics {
            admissions_granted: counters.granted,
            admissions_blocked: counters.blocked,
            total_block_time: counters.blocked_time,
            usage_timeouts_reported: counters.usage_reports,
            uptime: self.inner.created_at.elapsed(),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("max_conns", &self.max_conns())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Builder for creating a pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .concurrency(8)
///     .wrap(db);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    pool_config: PoolConfig,
    sanitization: SanitizationConfig,
}

impl PoolBuilder {
    /// Create a new pool builder. Limiting is disabled until configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of concurrently active operations; `0` is
    /// unlimited.
    #[must_use]
    pub fn concurrency(mut self, count: usize) -> Self {
        self.pool_config.concurrency = count;
        self
    }

    /// Set how SQL text is sanitized before being logged.
    #[must_use]
    pub fn sanitization(mut self, config: SanitizationConfig) -> Self {
        self.sanitization = config;
        self
    }

    /// Wrap an already open database handle.
    #[must_use]
    pub fn wrap(self, db: Box<dyn Database>) -> Pool {
        Pool::from_parts(db, self.pool_config, self.sanitization)
    }

    /// Open a database handle through `driver` and wrap it.
    pub async fn connect(self, driver: &dyn Driver, dsn: &str) -> Result<Pool> {
        tracing::debug!(driver = driver.name(), "opening database");
        let db = driver.open(dsn).await?;
        Ok(self.wrap(db))
    }

    /// Open through a driver from the process-wide registry.
    pub async fn open(self, driver: &str, dsn: &str) -> Result<Pool> {
        self.open_in(DriverRegistry::global(), driver, dsn).await
    }

    /// Open through a driver from `registry`.
    pub async fn open_in(self, registry: &DriverRegistry, driver: &str, dsn: &str) -> Result<Pool> {
        let driver = registry.lookup(driver)?;
        self.connect(driver.as_ref(), dsn).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Admissions that can be granted without waiting; `None` if unlimited.
    pub available: Option<usize>,
    /// Admissions currently held.
    pub in_use: usize,
    /// Maximum concurrent admissions; `0` if unlimited.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage. Always `0.0` when unlimited.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the next operation would have to wait.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.available == Some(0)
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Admissions granted since the pool was created.
    pub admissions_granted: u64,
    /// Admissions that had to wait for a token.
    pub admissions_blocked: u64,
    /// Total time spent waiting for tokens.
    pub total_block_time: Duration,
    /// Usage-timeout diagnostics delivered.
    pub usage_timeouts_reported: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Fraction of admissions that had to wait (0.0 to 1.0).
    #[must_use]
    pub fn block_rate(&self) -> f64 {
        if self.admissions_granted == 0 {
            return 0.0;
        }
        self.admissions_blocked as f64 / self.admissions_granted as f64
    }

    /// Mean wait of the admissions that blocked.
    #[must_use]
    pub fn average_block_time(&self) -> Duration {
        match u32::try_from(self.admissions_blocked) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_block_time / n,
            Err(_) => Duration::from_secs_f64(
                self.total_block_time.as_secs_f64() / self.admissions_blocked as f64,
            ),
        }
    }
}
