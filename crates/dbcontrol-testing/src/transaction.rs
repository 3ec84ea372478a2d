//! Mock transactions.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dbcontrol::backend::{Cursor, PreparedStatement, RowSource, TransactionHandle};
use dbcontrol::{Error, ExecResult, Result, Value};

use crate::mock::{InFlight, State, run_exec, run_query, run_query_row};
use crate::statement::MockStatement;

/// Transaction over the shared script.
///
/// Counts as in flight from begin until the first commit or rollback. A
/// second commit or rollback fails with [`Error::TxDone`].
#[derive(Debug)]
pub struct MockTransaction {
    state: Arc<State>,
    guard: Option<InFlight>,
}

impl MockTransaction {
    pub(crate) fn new(state: Arc<State>, guard: InFlight) -> Self {
        Self {
            state,
            guard: Some(guard),
        }
    }

    fn check_active(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(Error::TxDone);
        }
        Ok(())
    }

    fn finish(&mut self, key: &str) -> Result<()> {
        self.state.record(key.to_ascii_lowercase());
        self.check_active()?;
        self.guard = None;
        match self.state.failure(key) {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransactionHandle for MockTransaction {
    async fn exec(&self, sql: &str, _params: &[Value]) -> Result<ExecResult> {
        self.check_active()?;
        run_exec(&self.state, "tx.exec", sql).await
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.check_active()?;
        run_query(&self.state, "tx.query", sql).await
    }

    async fn query_row(&self, sql: &str, _params: &[Value]) -> Result<Box<dyn RowSource>> {
        self.check_active()?;
        run_query_row(&self.state, "tx.query_row", sql).await
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.check_active()?;
        self.state.record(format!("tx.prepare:{sql}"));
        Ok(Box::new(MockStatement::new(Arc::clone(&self.state), sql, true)))
    }

    async fn stmt(&self, stmt: &dyn PreparedStatement) -> Result<Box<dyn PreparedStatement>> {
        self.check_active()?;
        self.state.record(format!("tx.stmt:{}", stmt.sql()));
        Ok(Box::new(MockStatement::new(
            Arc::clone(&self.state),
            stmt.sql(),
            true,
        )))
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT")?;
        self.state.counters.commits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK")?;
        self.state.counters.rollbacks.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
