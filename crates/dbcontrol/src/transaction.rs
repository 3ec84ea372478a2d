//! Transaction support.

use crate::backend::TransactionHandle;
use crate::cursor::{QueryRow, Rows};
use crate::error::Result;
use crate::gate::Admission;
use crate::instrumentation::extract_operation;
use crate::row::ExecResult;
use crate::statement::Statement;
use crate::value::Value;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed.
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl IsolationLevel {
    /// Get the SQL statement to set this isolation level.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            Self::Snapshot => "SET TRANSACTION ISOLATION LEVEL SNAPSHOT",
        }
    }
}

/// A database transaction.
///
/// Holds one admission from `begin` until the first `commit` or `rollback`.
/// Everything run through the transaction (statements, cursors, prepared
/// statements) uses that admission and never acquires on its own.
///
/// Dropping an open transaction releases the admission; rolling back the
/// backend transaction is then up to the backend.
pub struct Transaction {
    inner: Box<dyn TransactionHandle>,
    admission: Admission,
    isolation: IsolationLevel,
    closed: bool,
}

impl Transaction {
    pub(crate) fn new(
        inner: Box<dyn TransactionHandle>,
        admission: Admission,
        isolation: IsolationLevel,
    ) -> Self {
        Self {
            inner,
            admission,
            isolation,
            closed: false,
        }
    }

    /// Get the isolation level of this transaction.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Execute a statement within the transaction.
    pub async fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        tracing::debug!(
            operation = extract_operation(sql),
            "executing statement in transaction"
        );
        self.inner.exec(sql, params).await
    }

    /// Run a multi-row query within the transaction.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Rows> {
        tracing::debug!(
            operation = extract_operation(sql),
            "executing query in transaction"
        );
        let cursor = self.inner.query(sql, params).await?;
        Ok(Rows::new(cursor, Admission::unmanaged()))
    }

    /// Run a single-row query within the transaction.
    pub async fn query_row(&self, sql: &str, params: &[Value]) -> QueryRow {
        QueryRow::new(
            self.inner.query_row(sql, params).await,
            Admission::unmanaged(),
        )
    }

    /// Prepare a statement bound to the transaction.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        let stmt = self.inner.prepare(sql).await?;
        Ok(Statement::new(stmt, None))
    }

    /// Use an existing pool statement inside this transaction.
    pub async fn stmt(&self, stmt: &Statement) -> Result<Statement> {
        let bound = self.inner.stmt(stmt.backend()).await?;
        Ok(Statement::new(bound, None))
    }

    /// Commit the transaction.
    ///
    /// The first commit or rollback releases the admission, whether or not the
    /// backend call succeeds. Later calls still reach the backend.
    pub async fn commit(&mut self) -> Result<()> {
        tracing::debug!("committing transaction");
        let result = self.inner.commit().await;
        self.finish();
        result
    }

    /// Roll back the transaction. See [`commit`](Self::commit).
    pub async fn rollback(&mut self) -> Result<()> {
        tracing::debug!("rolling back transaction");
        let result = self.inner.rollback().await;
        self.finish();
        result
    }

    /// Returns true once the transaction was committed or rolled back.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true while the transaction still holds its admission.
    #[must_use]
    pub fn holds_admission(&self) -> bool {
        self.admission.is_held()
    }

    fn finish(&mut self) {
        if !self.closed {
            self.admission.release();
            self.closed = true;
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("transaction dropped without commit or rollback");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("isolation", &self.isolation)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(
            IsolationLevel::Serializable.as_sql(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
    }
}
