//! Token pool and admission gate.
//!
//! Every database-consuming operation passes through [`Gate::acquire`]. In
//! bounded mode the gate owns a semaphore sized to the configured concurrency;
//! in unlimited mode there is no semaphore and acquisition never waits.
//!
//! An [`Admission`] is the proof of a granted acquisition. It moves from held
//! to released exactly once, either through [`Admission::release`] or on drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::monitor::{UsageMonitor, UsageTimer};
use crate::reporter::BlockReporter;

/// Counters maintained by the gate.
#[derive(Debug, Default)]
struct GateStats {
    granted: AtomicU64,
    blocked: AtomicU64,
    blocked_micros: AtomicU64,
}

/// Snapshot of gate counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GateCounters {
    pub(crate) granted: u64,
    pub(crate) blocked: u64,
    pub(crate) blocked_time: Duration,
    pub(crate) usage_reports: u64,
}

/// Admission gate of one pool.
#[derive(Debug)]
pub(crate) struct Gate {
    tokens: Option<Arc<Semaphore>>,
    max_conns: usize,
    outstanding: Arc<AtomicUsize>,
    closed: AtomicBool,
    reporter: BlockReporter,
    monitor: UsageMonitor,
    stats: GateStats,
}

impl Gate {
    /// Create a gate for `max_conns` concurrent admissions; `0` is unlimited.
    pub(crate) fn new(max_conns: usize) -> Self {
        Self {
            tokens: (max_conns > 0).then(|| Arc::new(Semaphore::new(max_conns))),
            max_conns,
            outstanding: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            reporter: BlockReporter::new(),
            monitor: UsageMonitor::new(),
            stats: GateStats::default(),
        }
    }

    pub(crate) fn max_conns(&self) -> usize {
        self.max_conns
    }

    pub(crate) fn is_bounded(&self) -> bool {
        self.tokens.is_some()
    }

    /// Tokens currently available, or `None` when unlimited.
    pub(crate) fn available(&self) -> Option<usize> {
        self.tokens.as_ref().map(|t| t.available_permits())
    }

    /// Admissions granted and not yet released.
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn reporter(&self) -> &BlockReporter {
        &self.reporter
    }

    pub(crate) fn monitor(&self) -> &UsageMonitor {
        &self.monitor
    }

    /// Acquire an admission, waiting for a token if none is free.
    ///
    /// Fails only after [`close`](Self::close).
    pub(crate) async fn acquire(&self) -> Result<Admission> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let permit = match &self.tokens {
            None => None,
            Some(tokens) => Some(self.take_token(tokens).await?),
        };
        let bounded = permit.is_some();
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        // From here on, dropping this future returns the token through the
        // admission's drop.
        let mut admission = Admission {
            state: AdmissionState::Held {
                permit,
                timer: None,
                outstanding: Arc::clone(&self.outstanding),
            },
        };

        let timer = self.monitor.start().await;
        let timed = timer.is_some();
        if let AdmissionState::Held { timer: slot, .. } = &mut admission.state {
            *slot = timer;
        }
        self.stats.granted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(bounded, timed, "admission granted");

        Ok(admission)
    }

    async fn take_token(&self, tokens: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
        match Arc::clone(tokens).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(Error::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let start = Instant::now();
        let permit = Arc::clone(tokens)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        let waited = start.elapsed();

        self.stats.blocked.fetch_add(1, Ordering::Relaxed);
        let waited_us = saturating_u64(waited.as_micros());
        self.stats.blocked_micros.fetch_add(waited_us, Ordering::Relaxed);
        tracing::debug!(waited_us, "admission was blocked");

        self.reporter.report(waited).await;
        Ok(permit)
    }

    /// Stop granting admissions. Waiting and future acquisitions fail with
    /// [`Error::PoolClosed`]; admissions already held stay valid.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(tokens) = &self.tokens {
            tokens.close();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn counters(&self) -> GateCounters {
        GateCounters {
            granted: self.stats.granted.load(Ordering::Relaxed),
            blocked: self.stats.blocked.load(Ordering::Relaxed),
            blocked_time: Duration::from_micros(self.stats.blocked_micros.load(Ordering::Relaxed)),
            usage_reports: self.monitor.reported(),
        }
    }
}

/// Narrow a `Duration` count to `u64`, saturating.
pub(crate) fn saturating_u64(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[derive(Debug)]
enum AdmissionState {
    /// Granted by a gate and not yet returned.
    Held {
        permit: Option<OwnedSemaphorePermit>,
        timer: Option<UsageTimer>,
        outstanding: Arc<AtomicUsize>,
    },
    /// Returned to the gate.
    Released,
    /// Covered by an enclosing admission (e.g. a statement run inside a
    /// transaction). Releasing it does nothing.
    Unmanaged,
}

/// Permission for one active database operation.
///
/// Returning the token and cancelling the usage timer happen together, once.
#[derive(Debug)]
#[must_use = "dropping an admission releases it immediately"]
pub(crate) struct Admission {
    state: AdmissionState,
}

impl Admission {
    /// An admission that holds nothing, for work already covered by an
    /// enclosing admission.
    pub(crate) fn unmanaged() -> Self {
        Self {
            state: AdmissionState::Unmanaged,
        }
    }

    /// Return the token and cancel the usage timer.
    ///
    /// Returns `true` if this call performed the release. Later calls, and
    /// calls on an unmanaged admission, return `false` and change nothing.
    pub(crate) fn release(&mut self) -> bool {
        match std::mem::replace(&mut self.state, AdmissionState::Released) {
            AdmissionState::Held {
                permit,
                timer,
                outstanding,
            } => {
                let timer_fired = timer.as_ref().is_some_and(UsageTimer::is_finished);
                if let Some(timer) = timer {
                    timer.cancel();
                }
                drop(permit);
                outstanding.fetch_sub(1, Ordering::AcqRel);
                tracing::trace!(timer_fired, "admission released");
                true
            }
            AdmissionState::Released => false,
            AdmissionState::Unmanaged => {
                self.state = AdmissionState::Unmanaged;
                false
            }
        }
    }

    /// Returns true while the admission still holds its token.
    #[must_use]
    pub(crate) fn is_held(&self) -> bool {
        matches!(self.state, AdmissionState::Held { .. })
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_bounded_gate_blocks_at_capacity() {
        let gate = Gate::new(2);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), Some(0));

        assert!(tokio::time::timeout(SHORT, gate.acquire()).await.is_err());

        drop(a);
        let c = tokio::time::timeout(SHORT, gate.acquire()).await;
        assert!(c.unwrap().unwrap().is_held());
    }

    #[tokio::test]
    async fn test_unlimited_gate_never_blocks() {
        let gate = Gate::new(0);
        assert!(!gate.is_bounded());
        let held: Vec<_> = futures_util::future::join_all((0..64).map(|_| gate.acquire()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(held.len(), 64);
        assert_eq!(gate.outstanding(), 64);
        assert_eq!(gate.available(), None);
        assert_eq!(gate.counters().blocked, 0);
    }

    #[tokio::test]
    async fn test_release_is_exactly_once() {
        let gate = Gate::new(1);
        let mut admission = gate.acquire().await.unwrap();
        assert!(admission.release());
        assert!(!admission.release());
        assert!(!admission.is_held());
        drop(admission);

        // A double release would have pushed the count above capacity.
        assert_eq!(gate.available(), Some(1));
    }

    #[tokio::test]
    async fn test_unmanaged_admission_releases_nothing() {
        let gate = Gate::new(1);
        let _held = gate.acquire().await.unwrap();
        let mut child = Admission::unmanaged();
        assert!(!child.is_held());
        assert!(!child.release());
        drop(child);
        assert_eq!(gate.available(), Some(0));
    }

    #[tokio::test]
    async fn test_blocked_acquisition_is_reported() {
        let gate = Arc::new(Gate::new(1));
        let (tx, mut rx) = mpsc::channel(1);
        gate.reporter().set(Some(tx)).await;

        let held = gate.acquire().await.unwrap();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(SHORT).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        let waited = rx.recv().await.unwrap();
        assert!(waited >= SHORT / 2, "waited {waited:?}");
        assert_eq!(gate.counters().blocked, 1);
        assert_eq!(gate.counters().granted, 2);
    }

    #[tokio::test]
    async fn test_unblocked_acquisition_is_not_reported() {
        let gate = Gate::new(3);
        let (tx, mut rx) = mpsc::channel(1);
        gate.reporter().set(Some(tx)).await;
        let _a = gate.acquire().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_new_acquisitions() {
        let gate = Arc::new(Gate::new(1));
        let held = gate.acquire().await.unwrap();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        gate.close();
        assert!(matches!(waiter.await.unwrap(), Err(Error::PoolClosed)));
        assert!(matches!(gate.acquire().await, Err(Error::PoolClosed)));
        assert!(held.is_held());
    }

    #[tokio::test]
    async fn test_release_cancels_usage_timer() {
        let gate = Gate::new(1);
        let (tx, mut rx) = mpsc::channel(1);
        gate.monitor().configure(Some(tx), SHORT).await;

        let mut admission = gate.acquire().await.unwrap();
        admission.release();
        tokio::time::sleep(SHORT * 3).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_saturating_u64() {
        assert_eq!(saturating_u64(1_500), 1_500);
        assert_eq!(saturating_u64(u128::from(u64::MAX) + 1), u64::MAX);
        assert_eq!(saturating_u64(Duration::MAX.as_micros()), u64::MAX);
    }

    proptest! {
        #[test]
        fn prop_outstanding_never_exceeds_capacity(
            cap in 1usize..6,
            ops in proptest::collection::vec(any::<bool>(), 1..64),
        ) {
            tokio_test::block_on(async {
                let gate = Gate::new(cap);
                let mut held = Vec::new();
                for acquire in ops {
                    if acquire && held.len() < cap {
                        held.push(gate.acquire().await.unwrap());
                    } else if let Some(mut admission) = held.pop() {
                        admission.release();
                    }
                    let available = gate.available().unwrap();
                    prop_assert_eq!(available + held.len(), cap);
                    prop_assert_eq!(gate.outstanding(), held.len());
                }
                Ok(())
            })?;
        }
    }
}
