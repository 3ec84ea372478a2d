//! Concurrency configuration.
//!
//! The process-wide setting mirrors the classic "set once, open pools
//! afterwards" usage. New code should prefer passing a [`PoolConfig`] to
//! [`Pool::builder()`](crate::Pool::builder).

use parking_lot::{RwLock, const_rwlock};

static CONCURRENCY: RwLock<usize> = const_rwlock(0);

/// Set the maximum number of concurrently active operations for every pool
/// opened afterwards. Pools that are already open keep their capacity.
///
/// Zero or a negative count disables limiting.
pub fn set_concurrency(count: i64) {
    let value = usize::try_from(count).unwrap_or(0);
    *CONCURRENCY.write() = value;
    tracing::debug!(concurrency = value, "global concurrency updated");
}

/// Current process-wide concurrency setting. `0` means unlimited.
#[must_use]
pub fn concurrency() -> usize {
    *CONCURRENCY.read()
}

/// Configuration applied when a pool is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of concurrently active operations. `0` means unlimited.
    pub concurrency: usize,
}

impl PoolConfig {
    /// Create a configuration with limiting disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the process-wide setting.
    #[must_use]
    pub fn from_global() -> Self {
        Self {
            concurrency: concurrency(),
        }
    }

    /// Set the concurrency cap.
    #[must_use]
    pub fn concurrency(mut self, count: usize) -> Self {
        self.concurrency = count;
        self
    }

    /// Returns true if this configuration bounds concurrency.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.concurrency > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The only test in this crate touching the global setting.
    #[test]
    fn test_global_setting_clamps_and_snapshots() {
        set_concurrency(-3);
        assert_eq!(concurrency(), 0);
        assert!(!PoolConfig::from_global().is_bounded());

        set_concurrency(4);
        let snapshot = PoolConfig::from_global();
        set_concurrency(9);
        assert_eq!(snapshot.concurrency, 4);
        assert_eq!(concurrency(), 9);

        set_concurrency(0);
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new().concurrency(3);
        assert_eq!(config.concurrency, 3);
        assert!(config.is_bounded());
        assert!(!PoolConfig::default().is_bounded());
    }
}
