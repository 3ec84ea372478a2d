//! Prepared statements.

use std::sync::Arc;

use crate::backend::PreparedStatement;
use crate::cursor::{QueryRow, Rows};
use crate::error::Result;
use crate::gate::{Admission, Gate};
use crate::instrumentation::extract_operation;
use crate::row::ExecResult;
use crate::value::Value;

/// A prepared statement.
///
/// Preparing holds an admission only for the prepare call itself. Each
/// execution acquires again, per invocation. Statements obtained through a
/// [`Transaction`](crate::Transaction) never acquire: the transaction already
/// holds an admission for its whole lifetime.
pub struct Statement {
    inner: Box<dyn PreparedStatement>,
    gate: Option<Arc<Gate>>,
}

impl Statement {
    pub(crate) fn new(inner: Box<dyn PreparedStatement>, gate: Option<Arc<Gate>>) -> Self {
        Self { inner, gate }
    }

    async fn admit(&self) -> Result<Admission> {
        match &self.gate {
            Some(gate) => gate.acquire().await,
            None => Ok(Admission::unmanaged()),
        }
    }

    /// SQL text of the statement.
    #[must_use]
    pub fn sql(&self) -> &str {
        self.inner.sql()
    }

    /// Returns true if the statement belongs to a transaction.
    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.gate.is_none()
    }

    /// Execute the statement.
    pub async fn exec(&self, params: &[Value]) -> Result<ExecResult> {
        let mut admission = self.admit().await?;
        tracing::debug!(
            operation = extract_operation(self.sql()),
            params_count = params.len(),
            "executing prepared statement"
        );
        let result = self.inner.exec(params).await;
        admission.release();
        result
    }

    /// Run the statement as a multi-row query.
    pub async fn query(&self, params: &[Value]) -> Result<Rows> {
        let mut admission = self.admit().await?;
        match self.inner.query(params).await {
            Ok(cursor) => Ok(Rows::new(cursor, admission)),
            Err(e) => {
                admission.release();
                Err(e)
            }
        }
    }

    /// Run the statement as a single-row query.
    pub async fn query_row(&self, params: &[Value]) -> QueryRow {
        match self.admit().await {
            Ok(admission) => QueryRow::new(self.inner.query_row(params).await, admission),
            Err(e) => QueryRow::failed(e),
        }
    }

    /// Close the statement. Does not pass through the admission gate.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    pub(crate) fn backend(&self) -> &dyn PreparedStatement {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("transactional", &self.is_transactional())
            .finish()
    }
}
