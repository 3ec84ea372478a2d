//! Usage-timeout monitoring.
//!
//! When enabled, every admission starts a timer. If the admission is still
//! held when the timer expires, the backtrace captured at acquisition time is
//! sent to the configured channel. The holder is never interrupted.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::gate::saturating_u64;

#[derive(Debug, Default)]
struct UsageSettings {
    channel: Option<mpsc::Sender<String>>,
    timeout: Duration,
}

/// Shared usage-timeout configuration of one pool.
#[derive(Debug, Clone, Default)]
pub(crate) struct UsageMonitor {
    settings: Arc<RwLock<UsageSettings>>,
    reported: Arc<AtomicU64>,
}

impl UsageMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set the report channel and timeout.
    ///
    /// `None` disables monitoring and resets the timeout to zero. Running
    /// timers keep the duration they started with. Once this returns, the previous
    /// channel is never sent on again.
    pub(crate) async fn configure(&self, channel: Option<mpsc::Sender<String>>, timeout: Duration) {
        let mut settings = self.settings.write().await;
        settings.timeout = if channel.is_some() {
            timeout
        } else {
            Duration::ZERO
        };
        settings.channel = channel;
        tracing::debug!(
            timeout_ms = saturating_u64(settings.timeout.as_millis()),
            "usage timeout configured"
        );
    }

    pub(crate) async fn timeout(&self) -> Duration {
        self.settings.read().await.timeout
    }

    /// Number of diagnostics delivered so far.
    pub(crate) fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Start a timer for a new admission, if a timeout is configured.
    pub(crate) async fn start(&self) -> Option<UsageTimer> {
        let timeout = self.timeout().await;
        if timeout.is_zero() {
            return None;
        }

        // Symbols are resolved only if the timer fires.
        let stack = Backtrace::force_capture();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watch(
            Arc::clone(&self.settings),
            Arc::clone(&self.reported),
            timeout,
            stack,
            cancel.clone(),
        ));

        Some(UsageTimer { cancel, handle })
    }
}

async fn watch(
    settings: Arc<RwLock<UsageSettings>>,
    reported: Arc<AtomicU64>,
    timeout: Duration,
    stack: Backtrace,
    cancel: CancellationToken,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(timeout) => {
            let settings = settings.read().await;
            if let Some(tx) = settings.channel.as_ref() {
                tracing::warn!(
                    timeout_ms = saturating_u64(timeout.as_millis()),
                    "admission held past usage timeout"
                );
                if tx.send(stack.to_string()).await.is_ok() {
                    reported.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// A running usage timer. Cancelled on [`cancel`](Self::cancel) or drop.
#[derive(Debug)]
pub(crate) struct UsageTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl UsageTimer {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the timer fired or was cancelled.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for UsageTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
