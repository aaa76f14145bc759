//! Two-phase garbage collection of silences.
//!
//! Each run of the [`ExpiryWorker`] first marks active silences past their
//! end as expired, then purges expired silences older than the retention
//! window. Both phases are bounded by the batch size; a backlog drains over
//! successive ticks. The worker never touches the cache: the sync worker
//! picks up its writes on its next run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SilenceConfig;
use crate::error::SilenceError;
use crate::metrics::{GcPhase, SilenceMetrics};
use crate::store::SilenceStore;

/// The outcome of one expiry run.
#[derive(Debug, Clone, Default)]
pub struct ExpiryReport {
    /// Silences moved from active to expired.
    pub expired: u64,
    /// Expired silences deleted.
    pub purged: u64,
    /// Failure of the expire phase, if any.
    pub expire_error: Option<SilenceError>,
    /// Failure of the purge phase, if any.
    pub purge_error: Option<SilenceError>,
    /// Whether the run stopped between phases because of cancellation.
    pub cancelled: bool,
}

impl ExpiryReport {
    /// Returns true if neither phase failed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.expire_error.is_none() && self.purge_error.is_none()
    }
}

/// Periodic task that expires and purges silences in the store.
#[derive(Clone)]
pub struct ExpiryWorker {
    store: Arc<dyn SilenceStore>,
    metrics: Arc<SilenceMetrics>,
    interval: Duration,
    retention: Duration,
    batch_size: usize,
}

impl std::fmt::Debug for ExpiryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryWorker")
            .field("interval", &self.interval)
            .field("retention", &self.retention)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl ExpiryWorker {
    /// Creates a worker from the subsystem configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn SilenceStore>,
        metrics: Arc<SilenceMetrics>,
        config: &SilenceConfig,
    ) -> Self {
        Self {
            store,
            metrics,
            interval: config.gc_interval(),
            retention: config.gc_retention(),
            batch_size: config.gc_batch_size,
        }
    }

    /// Runs immediately, then on every tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.as_secs(),
            batch_size = self.batch_size,
            "expiry worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_cycle(Utc::now(), Some(&cancel)).await;
        }

        info!("expiry worker stopped");
    }

    /// Executes one run synchronously.
    pub async fn run_once(&self) -> ExpiryReport {
        self.run_cycle(Utc::now(), None).await
    }

    /// Executes one run as if the current time were `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> ExpiryReport {
        self.run_cycle(now, None).await
    }

    async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        cancel: Option<&CancellationToken>,
    ) -> ExpiryReport {
        let mut report = ExpiryReport::default();

        match self.phase(GcPhase::Expire, now).await {
            Ok(count) => report.expired = count,
            Err(e) => report.expire_error = Some(e),
        }

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!("expiry run cancelled between phases");
            report.cancelled = true;
            return report;
        }

        match self.purge_cutoff(now) {
            Some(cutoff) => match self.phase(GcPhase::Purge, cutoff).await {
                Ok(count) => report.purged = count,
                Err(e) => report.purge_error = Some(e),
            },
            None => debug!("retention window exceeds representable time, skipping purge"),
        }

        if report.expired > 0 || report.purged > 0 {
            info!(
                expired = report.expired,
                purged = report.purged,
                "expiry run complete"
            );
        } else {
            debug!("expiry run complete, nothing to do");
        }

        report
    }

    async fn phase(&self, phase: GcPhase, before: DateTime<Utc>) -> crate::Result<u64> {
        let hard_delete = phase == GcPhase::Purge;
        let started = Instant::now();
        let result = self
            .store
            .expire_silences(before, hard_delete, self.batch_size)
            .await;

        match &result {
            Ok(count) => {
                self.metrics
                    .record_gc_phase(phase, *count, started.elapsed(), true);
                if *count as usize >= self.batch_size {
                    debug!(%phase, batch_size = self.batch_size, "batch full, backlog continues next tick");
                }
            }
            Err(e) => {
                self.metrics.record_gc_phase(phase, 0, started.elapsed(), false);
                warn!(%phase, error = %e, "expiry phase failed, retrying next tick");
            }
        }

        result
    }

    fn purge_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let retention = chrono::Duration::from_std(self.retention).ok()?;
        now.checked_sub_signed(retention)
    }
}
