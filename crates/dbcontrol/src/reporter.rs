//! Reporting of admission waits.

use std::time::Duration;

use tokio::sync::{RwLock, mpsc};

/// Optional channel receiving the wait time of every blocked acquisition.
///
/// Sends happen while holding the read side of the lock that
/// [`BlockReporter::set`] takes for writing, so a send either targets the old
/// channel before it is replaced or the new one afterwards.
#[derive(Debug, Default)]
pub(crate) struct BlockReporter {
    channel: RwLock<Option<mpsc::Sender<Duration>>>,
}

impl BlockReporter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the channel. The previous sender is dropped, which closes the
    /// channel for its receiver unless the caller kept other senders alive.
    pub(crate) async fn set(&self, channel: Option<mpsc::Sender<Duration>>) {
        let mut current = self.channel.write().await;
        if current.take().is_some() {
            tracing::debug!("closing previous block-duration channel");
        }
        *current = channel;
    }

    /// Send a wait duration if a channel is configured.
    ///
    /// Waits for channel capacity: a receiver that stops draining stalls the
    /// acquiring task.
    pub(crate) async fn report(&self, waited: Duration) {
        let current = self.channel.read().await;
        if let Some(tx) = current.as_ref() {
            if tx.send(waited).await.is_err() {
                tracing::trace!("block-duration receiver dropped");
            }
        }
    }

    #[cfg(test)]
    async fn is_enabled(&self) -> bool {
        self.channel.read().await.is_some()
    }
}
