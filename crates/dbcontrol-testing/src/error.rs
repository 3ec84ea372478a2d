//! Errors produced by the mock backend.

use thiserror::Error;

/// Failure injected by a test script.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    /// A statement was scripted to fail.
    #[error("scripted failure: {0}")]
    Scripted(String),

    /// The database was closed.
    #[error("mock database is closed")]
    Closed,
}

impl From<MockError> for dbcontrol::Error {
    fn from(err: MockError) -> Self {
        dbcontrol::Error::driver(err)
    }
}

/// Returns the [`MockError`] carried by a `dbcontrol` error, if any.
#[must_use]
pub fn mock_error(err: &dbcontrol::Error) -> Option<&MockError> {
    match err {
        dbcontrol::Error::Driver(inner) => inner.downcast_ref::<MockError>(),
        _ => None,
    }
}
