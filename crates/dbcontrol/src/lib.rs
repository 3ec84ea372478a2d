//! # dbcontrol
//!
//! Admission control for async database clients.
//!
//! A [`Pool`] wraps an open database handle and caps the number of operations
//! that may be active against it at the same time. Operations beyond the cap
//! wait until an active one finishes. The backend's own connection pool is
//! left in charge of connections; `dbcontrol` only decides who may use one.
//!
//! ## Features
//!
//! - **Bounded concurrency**: one token per active operation, unlimited when
//!   the configured concurrency is zero
//! - **Long-lived handles**: cursors and transactions hold their admission
//!   until they are exhausted, closed, committed or rolled back
//! - **Block-duration reporting**: wait times of blocked operations are sent
//!   to an optional channel
//! - **Usage timeouts**: operations holding an admission for too long are
//!   reported with the backtrace of the acquisition site
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! use dbcontrol::{Pool, Value};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     dbcontrol::register(std::sync::Arc::new(my_driver::Driver))?;
//!     dbcontrol::set_concurrency(16);
//!
//!     let pool = Pool::open("my_driver", "host=localhost dbname=app").await?;
//!
//!     let (tx, mut rx) = mpsc::channel(64);
//!     pool.set_block_duration_channel(Some(tx)).await;
//!     tokio::spawn(async move {
//!         while let Some(waited) = rx.recv().await {
//!             println!("blocked for {waited:?}");
//!         }
//!     });
//!
//!     let name: String = pool
//!         .query_row("SELECT name FROM users WHERE id = $1", &[Value::Int(1)])
//!         .await
//!         .scan_as()
//!         .await?;
//!     println!("User: {name}");
//!
//!     pool.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod config;
pub mod cursor;
pub mod error;
mod gate;
pub mod instrumentation;
mod monitor;
pub mod pool;
pub mod registry;
mod reporter;
pub mod row;
pub mod statement;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use config::{PoolConfig, concurrency, set_concurrency};
pub use cursor::{QueryRow, Rows};
pub use error::{Error, Result};
pub use instrumentation::SanitizationConfig;
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus};
pub use registry::{DriverRegistry, lookup, register};
pub use row::{Column, ExecResult, Row};
pub use statement::Statement;
pub use transaction::{IsolationLevel, Transaction};
pub use value::{FromValue, Value};
