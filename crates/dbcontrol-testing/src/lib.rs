//! # dbcontrol-testing
//!
//! Test infrastructure for dbcontrol.
//!
//! This crate provides an in-memory database backend that implements the
//! `dbcontrol::backend` traits without any network I/O:
//!
//! - Scripted result sets and per-statement failures
//! - Latches that hold a statement open until the test lets it finish
//! - Counters for in-flight operations, commits, rollbacks and closes
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbcontrol::Pool;
//! use dbcontrol_testing::MockDatabase;
//!
//! let db = MockDatabase::new();
//! db.script_rows("SELECT 1", ["one"], vec![vec![1.into()]]);
//!
//! let pool = Pool::builder().concurrency(1).wrap(Box::new(db.clone()));
//! let one: i64 = pool.query_row("SELECT 1", &[]).await.scan_as().await?;
//! assert_eq!(db.peak_in_flight(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cursor;
pub mod error;
pub mod mock;
pub mod statement;
pub mod transaction;

pub use error::MockError;
pub use mock::{Latch, MockDatabase, MockDriver};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to `dbcontrol=debug`. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dbcontrol=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
