//! Driver registry.
//!
//! [`Pool::open`](crate::Pool::open) resolves drivers by name through the
//! process-wide registry. A [`DriverRegistry`] can also be built and passed
//! around explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::backend::Driver;
use crate::error::{Error, Result};

static DRIVER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_+-]{0,63}$").unwrap());

static GLOBAL: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::new);

/// A set of drivers keyed by name.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static DriverRegistry {
        &GLOBAL
    }

    /// Register a driver under its own [`name`](Driver::name).
    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<()> {
        let name = driver.name().to_string();
        if !DRIVER_NAME_RE.is_match(&name) {
            return Err(Error::InvalidDriverName(name));
        }

        let mut drivers = self.drivers.write();
        if drivers.contains_key(&name) {
            return Err(Error::DuplicateDriver(name));
        }
        tracing::debug!(driver = %name, "driver registered");
        drivers.insert(name, driver);
        Ok(())
    }

    /// Look up a driver by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))
    }

    /// Names of all registered drivers, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Register a driver in the process-wide registry.
pub fn register(driver: Arc<dyn Driver>) -> Result<()> {
    GLOBAL.register(driver)
}

/// Look up a driver in the process-wide registry.
pub fn lookup(name: &str) -> Result<Arc<dyn Driver>> {
    GLOBAL.lookup(name)
}
