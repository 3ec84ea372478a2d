//! Interface to the underlying database client.
//!
//! `dbcontrol` does not speak any wire protocol. A driver crate implements
//! these traits on top of its own connection handling, and [`Pool`] forwards
//! every operation to them after passing the admission gate.
//!
//! Error values returned from these traits reach the caller unchanged.
//!
//! [`Pool`]: crate::Pool

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::row::{Column, ExecResult, Row};
use crate::transaction::IsolationLevel;
use crate::value::Value;

/// Opens database handles from a connection descriptor.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Name the driver is registered under (e.g. `"postgres"`).
    fn name(&self) -> &str;

    /// Open a database handle. This may or may not dial immediately.
    async fn open(&self, dsn: &str) -> Result<Box<dyn Database>>;
}

/// An open database handle, usually backed by the driver's own connection pool.
#[async_trait]
pub trait Database: Send + Sync {
    /// Limit the number of idle connections kept by the backend.
    fn set_max_idle_conns(&self, n: usize);

    /// Verify the database is reachable.
    async fn ping(&self) -> Result<()>;

    /// Execute a statement that does not return rows.
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Execute a query returning a multi-row cursor.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>>;

    /// Execute a query expected to return at most one row.
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowSource>>;

    /// Prepare a statement for repeated execution.
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Begin a transaction.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn TransactionHandle>>;

    /// Close the handle and release backend resources.
    async fn close(&self) -> Result<()>;
}

/// A streaming multi-row result set. Keeps a backend connection busy until it
/// is exhausted or closed.
#[async_trait]
pub trait Cursor: Send {
    /// Column metadata for the result set.
    fn columns(&self) -> Arc<[Column]>;

    /// Advance to the next row. `Ok(None)` marks the natural end of results.
    async fn next(&mut self) -> Result<Option<Row>>;

    /// Close the cursor. Closing twice must be harmless.
    async fn close(&mut self) -> Result<()>;
}

/// Result of a single-row query, decoded once.
#[async_trait]
pub trait RowSource: Send {
    /// Decode the row. Returns [`Error::NoRows`](crate::Error::NoRows) when
    /// the query matched nothing.
    async fn scan(self: Box<Self>) -> Result<Row>;
}

/// A prepared statement.
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// SQL text the statement was prepared from.
    fn sql(&self) -> &str;

    /// Execute the statement.
    async fn exec(&self, params: &[Value]) -> Result<ExecResult>;

    /// Run the statement as a multi-row query.
    async fn query(&self, params: &[Value]) -> Result<Box<dyn Cursor>>;

    /// Run the statement as a single-row query.
    async fn query_row(&self, params: &[Value]) -> Result<Box<dyn RowSource>>;

    /// Deallocate the statement.
    async fn close(&self) -> Result<()>;
}

/// An in-progress transaction.
#[async_trait]
pub trait TransactionHandle: Send + Sync {
    /// Execute a statement inside the transaction.
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult>;

    /// Run a multi-row query inside the transaction.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Box<dyn Cursor>>;

    /// Run a single-row query inside the transaction.
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowSource>>;

    /// Prepare a statement bound to the transaction.
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Re-bind an existing statement to this transaction.
    async fn stmt(&self, stmt: &dyn PreparedStatement) -> Result<Box<dyn PreparedStatement>>;

    /// Commit. A second call reports [`Error::TxDone`](crate::Error::TxDone).
    async fn commit(&mut self) -> Result<()>;

    /// Roll back. A second call reports [`Error::TxDone`](crate::Error::TxDone).
    async fn rollback(&mut self) -> Result<()>;
}
