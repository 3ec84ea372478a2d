//! Error types.

use thiserror::Error;

/// Boxed error produced by a database backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by `dbcontrol`.
///
/// Backend failures are carried through unchanged: whatever a
/// [`Database`](crate::backend::Database) implementation returns is what the
/// caller of the corresponding [`Pool`](crate::Pool) operation observes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Opaque failure reported by the database backend.
    #[error(transparent)]
    Driver(BoxError),

    /// A single-row query matched no rows.
    #[error("no rows in result set")]
    NoRows,

    /// The transaction was already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TxDone,

    /// The prepared statement was closed.
    #[error("statement is closed")]
    StatementClosed,

    /// The cursor was closed.
    #[error("cursor is closed")]
    CursorClosed,

    /// No driver is registered under the given name.
    #[error("unknown driver {0:?} (forgotten registration?)")]
    UnknownDriver(String),

    /// A driver with the same name is already registered.
    #[error("driver {0:?} is already registered")]
    DuplicateDriver(String),

    /// Driver names must be lowercase identifiers.
    #[error("invalid driver name {0:?}")]
    InvalidDriverName(String),

    /// A column index was out of range.
    #[error("column index {index} out of range ({len} columns)")]
    ColumnIndex {
        /// Requested index.
        index: usize,
        /// Number of columns in the row.
        len: usize,
    },

    /// A column name did not match any column.
    #[error("column {0:?} not found")]
    ColumnNotFound(String),

    /// A value could not be converted to the requested type.
    #[error("cannot convert {actual} to {expected}")]
    Conversion {
        /// Requested Rust type.
        expected: &'static str,
        /// Kind of the stored value.
        actual: &'static str,
    },

    /// The pool was closed; no further admissions are granted.
    #[error("pool is closed")]
    PoolClosed,
}

impl Error {
    /// Wrap an arbitrary backend error.
    pub fn driver<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Driver(err.into())
    }

    /// Returns true if this error came from the backend rather than from
    /// `dbcontrol` itself.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::Driver(_)
                | Self::NoRows
                | Self::TxDone
                | Self::StatementClosed
                | Self::CursorClosed
        )
    }
}

/// Result type for `dbcontrol` operations.
pub type Result<T> = std::result::Result<T, Error>;
