//! Cursor handles that keep their admission while results are being read.

use std::sync::Arc;

use futures_core::Stream;

use crate::backend::{Cursor, RowSource};
use crate::error::{Error, Result};
use crate::gate::Admission;
use crate::row::{Column, Row};
use crate::value::FromValue;

/// A multi-row result set.
///
/// The underlying cursor keeps a backend connection busy, so the admission is
/// held until the results are exhausted, [`close`](Self::close) is called, or
/// the handle is dropped, whichever comes first.
pub struct Rows {
    inner: Box<dyn Cursor>,
    admission: Admission,
    closed: bool,
}

impl Rows {
    pub(crate) fn new(inner: Box<dyn Cursor>, admission: Admission) -> Self {
        Self {
            inner,
            admission,
            closed: false,
        }
    }

    /// Column metadata for the result set.
    #[must_use]
    pub fn columns(&self) -> Arc<[Column]> {
        self.inner.columns()
    }

    /// Fetch the next row.
    ///
    /// `Ok(None)` marks the end of results; the admission is released at that
    /// point. An error leaves the admission held until the cursor is closed.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Ok(None);
        }

        match self.inner.next().await {
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            other => other,
        }
    }

    /// Close the cursor.
    ///
    /// Always forwards to the backend, even after the results were exhausted,
    /// but releases the admission at most once.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.inner.close().await;
        self.finish();
        result
    }

    /// Read all remaining rows, then close the cursor.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            match self.next().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => {
                    // The read error is what the caller needs to see.
                    let _ = self.close().await;
                    return Err(e);
                }
            }
        }
        self.close().await?;
        Ok(rows)
    }

    /// Turn the cursor into a stream of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> + Send {
        futures_util::stream::try_unfold(self, |mut rows| async move {
            let next = rows.next().await?;
            Ok::<_, Error>(next.map(|row| (row, rows)))
        })
    }

    /// Returns true once the cursor was exhausted or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns true while this cursor still holds its admission.
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

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("closed", &self.closed)
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

/// The result of a single-row query.
///
/// The admission is released by [`scan`](Self::scan), whatever its outcome.
/// If the query itself failed, the admission was already released and
/// `scan` returns that failure.
pub struct QueryRow {
    source: Result<Box<dyn RowSource>>,
    admission: Admission,
}

impl QueryRow {
    pub(crate) fn new(source: Result<Box<dyn RowSource>>, mut admission: Admission) -> Self {
        if source.is_err() {
            admission.release();
        }
        Self { source, admission }
    }

    /// Decode the row.
    pub async fn scan(mut self) -> Result<Row> {
        let result = match self.source {
            Ok(source) => source.scan().await,
            Err(e) => Err(e),
        };
        self.admission.release();
        result
    }

    /// Decode the first column of the row.
    pub async fn scan_as<T: FromValue>(self) -> Result<T> {
        let row = self.scan().await?;
        row.get(0)
    }

    /// Returns true if the query failed before any row could be read.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.source.is_err()
    }

    /// Returns true while this handle still holds its admission.
    #[must_use]
    pub fn holds_admission(&self) -> bool {
        self.admission.is_held()
    }
}

impl std::fmt::Debug for QueryRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRow")
            .field("failed", &self.is_failed())
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

impl QueryRow {
    /// A handle for a query that never ran, holding no admission.
    pub(crate) fn failed(err: Error) -> Self {
        Self::new(Err(err), Admission::unmanaged())
    }
}
