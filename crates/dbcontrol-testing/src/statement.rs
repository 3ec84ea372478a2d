//! Mock prepared statements.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dbcontrol::backend::{Cursor, PreparedStatement, RowSource};
use dbcontrol::{Error, ExecResult, Result, Value};

use crate::mock::{State, run_exec, run_query, run_query_row};

/// Prepared statement over the shared script.
#[derive(Debug)]
pub struct MockStatement {
    state: Arc<State>,
    sql: String,
    in_transaction: bool,
    closed: AtomicBool,
}

impl MockStatement {
    pub(crate) fn new(state: Arc<State>, sql: &str, in_transaction: bool) -> Self {
        Self {
            state,
            sql: sql.to_string(),
            in_transaction,
            closed: AtomicBool::new(false),
        }
    }

    fn kind(&self, op: &str) -> String {
        if self.in_transaction {
            format!("tx.stmt.{op}")
        } else {
            format!("stmt.{op}")
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StatementClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl PreparedStatement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn exec(&self, _params: &[Value]) -> Result<ExecResult> {
        self.check_open()?;
        run_exec(&self.state, &self.kind("exec"), &self.sql).await
    }

    async fn query(&self, _params: &[Value]) -> Result<Box<dyn Cursor>> {
        self.check_open()?;
        run_query(&self.state, &self.kind("query"), &self.sql).await
    }

    async fn query_row(&self, _params: &[Value]) -> Result<Box<dyn RowSource>> {
        self.check_open()?;
        run_query_row(&self.state, &self.kind("query_row"), &self.sql).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.state.record(self.kind("close"));
            self.state
                .counters
                .statement_closes
                .fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}
