//! Mock cursors.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dbcontrol::backend::{Cursor, RowSource};
use dbcontrol::{Column, Error, Result, Row, Value};

use crate::error::MockError;
use crate::mock::{InFlight, ResultSet, State};

/// Cursor over a scripted result set.
///
/// Counts as in flight until exhausted or closed.
#[derive(Debug)]
pub struct MockCursor {
    state: Arc<State>,
    columns: Arc<[Column]>,
    rows: VecDeque<Vec<Value>>,
    fail_read: bool,
    guard: Option<InFlight>,
}

impl MockCursor {
    pub(crate) fn new(state: Arc<State>, set: ResultSet, fail_read: bool, guard: InFlight) -> Self {
        Self {
            state,
            columns: set.columns,
            rows: set.rows.into(),
            fail_read,
            guard: Some(guard),
        }
    }
}

#[async_trait]
impl Cursor for MockCursor {
    fn columns(&self) -> Arc<[Column]> {
        Arc::clone(&self.columns)
    }

    async fn next(&mut self) -> Result<Option<Row>> {
        if self.fail_read {
            self.fail_read = false;
            return Err(MockError::Scripted("cursor read failed".into()).into());
        }
        match self.rows.pop_front() {
            Some(values) => Ok(Some(Row::new(Arc::clone(&self.columns), values))),
            None => {
                self.guard = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.guard = None;
        self.state.record("cursor.close");
        self.state
            .counters
            .cursor_closes
            .fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// First row of a scripted result set.
#[derive(Debug)]
pub struct MockRowSource {
    row: Option<Row>,
}

impl MockRowSource {
    pub(crate) fn first_of(set: ResultSet) -> Self {
        let columns = set.columns;
        Self {
            row: set
                .rows
                .into_iter()
                .next()
                .map(|values| Row::new(columns, values)),
        }
    }
}

#[async_trait]
impl RowSource for MockRowSource {
    async fn scan(self: Box<Self>) -> Result<Row> {
        self.row.ok_or(Error::NoRows)
    }
}
