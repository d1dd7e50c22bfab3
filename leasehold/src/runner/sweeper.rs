//! Background service that returns overdue jobs to the queue.
//!
//! The sweeper runs the lease scan and the stall scan on their own intervals. Both scans are
//! single bulk updates guarded by the job's current state, so any number of sweepers may run
//! against the same store at once.

use crate::core::recovery::RecoveryKind;
use crate::core::store::JobStore;
use crate::core::{DateTime, Utc};
use std::{future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Options for configuring the sweeper.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SweeperOptions {
    /// How often to run the lease-expiry scan (default: 5 seconds)
    pub lease_interval: Duration,

    /// How often to run the stall scan (default: 30 seconds)
    pub stall_interval: Duration,
}

impl SweeperOptions {
    pub fn new(lease_interval: Duration, stall_interval: Duration) -> Self {
        Self {
            lease_interval,
            stall_interval,
        }
    }

    fn interval_for(&self, kind: RecoveryKind) -> Duration {
        match kind {
            RecoveryKind::Lease => self.lease_interval,
            RecoveryKind::Stall => self.stall_interval,
        }
    }
}

impl Default for SweeperOptions {
    fn default() -> Self {
        Self {
            lease_interval: Duration::from_secs(5),
            stall_interval: Duration::from_secs(30),
        }
    }
}

/// Jobs requeued by one pass of [`Sweeper::sweep_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: u64,
    pub stalled: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.expired + self.stalled
    }
}

/// Periodically requeues jobs whose lease or stall deadline has passed.
///
/// # Example
///
/// ```rust,no_run
/// use leasehold::core::store::JobStore;
/// use leasehold::runner::sweeper::{Sweeper, SweeperOptions};
///
/// # async fn example<S: JobStore + 'static>(store: S) {
/// let sweeper = Sweeper::new(store, SweeperOptions::default());
///
/// // Run until shutdown signal
/// let shutdown = async {
///     let _ = tokio::signal::ctrl_c().await;
/// };
/// sweeper.run_with_shutdown(shutdown).await;
/// # }
/// ```
pub struct Sweeper<S>
where
    S: JobStore,
{
    store: Arc<S>,
    options: SweeperOptions,
}

impl<S> Sweeper<S>
where
    S: JobStore + 'static,
{
    pub fn new(store: S, options: SweeperOptions) -> Self {
        Self::from_arc(Arc::new(store), options)
    }

    /// Build a sweeper that shares `store` with the rest of the application.
    pub fn from_arc(store: Arc<S>, options: SweeperOptions) -> Self {
        info!(
            lease_interval = ?options.lease_interval,
            stall_interval = ?options.stall_interval,
            "Initializing sweeper"
        );

        Self { store, options }
    }

    /// Run both scans once.
    pub async fn sweep_once(&self, now: DateTime) -> SweepReport {
        SweepReport {
            expired: self.sweep(RecoveryKind::Lease, now).await,
            stalled: self.sweep(RecoveryKind::Stall, now).await,
        }
    }

    /// Run the sweeper until the shutdown future completes.
    pub async fn run_with_shutdown<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let token = CancellationToken::new();
        let run = self.run_until_cancelled(token.clone());
        tokio::pin!(run);
        tokio::pin!(shutdown);

        tokio::select! {
            _ = &mut run => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping sweeper");
                token.cancel();
                run.await;
            }
        }
    }

    /// Run the sweeper until `cancellation_token` is cancelled.
    pub async fn run_until_cancelled(&self, cancellation_token: CancellationToken) {
        info!("Sweeper starting");

        let mut lease = self.interval(RecoveryKind::Lease);
        let mut stall = self.interval(RecoveryKind::Stall);

        loop {
            tokio::select! {
                _ = lease.tick() => {
                    self.sweep(RecoveryKind::Lease, Utc::now()).await;
                }
                _ = stall.tick() => {
                    self.sweep(RecoveryKind::Stall, Utc::now()).await;
                }
                _ = cancellation_token.cancelled() => {
                    break;
                }
            }
        }

        info!("Sweeper stopped");
    }

    fn interval(&self, kind: RecoveryKind) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(self.options.interval_for(kind));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    }

    /// Run one scan. Errors are logged and reported as zero requeued jobs.
    #[instrument(skip_all, fields(kind = %kind, requeued))]
    async fn sweep(&self, kind: RecoveryKind, now: DateTime) -> u64 {
        match self.store.recover(kind, now).await {
            Ok(0) => {
                debug!("No overdue jobs");
                0
            }
            Ok(count) => {
                tracing::Span::current().record("requeued", count);
                info!(count, "Requeued overdue jobs");
                count
            }
            Err(e) => {
                error!(error = %e, "Recovery scan failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SweeperOptions::default();
        assert_eq!(opts.lease_interval, Duration::from_secs(5));
        assert_eq!(opts.stall_interval, Duration::from_secs(30));
        assert_eq!(opts.interval_for(RecoveryKind::Lease), opts.lease_interval);
        assert_eq!(opts.interval_for(RecoveryKind::Stall), opts.stall_interval);
    }

    #[test]
    fn report_total() {
        let report = SweepReport {
            expired: 2,
            stalled: 3,
        };
        assert_eq!(report.total(), 5);
        assert_eq!(SweepReport::default().total(), 0);
    }
}
