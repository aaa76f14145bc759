//! Periodic resynchronization of the active-silence cache.
//!
//! The [`SyncWorker`] is the only bulk writer of the cache. Each run loads
//! the store's active set and swaps it in with
//! [`ActiveSilenceCache::rebuild`]. A failed query leaves the previous
//! contents in place until the next successful run.
//!
//! Each run also settles pending silences: those whose window has opened
//! become active, and those whose window passed between runs become
//! expired. Both are status-only transitions, so an operator's concurrent
//! edit is never overwritten.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ActiveSilenceCache;
use crate::config::SilenceConfig;
use crate::error::Result;
use crate::metrics::SilenceMetrics;
use crate::store::SilenceStore;
use crate::types::{Silence, SilenceFilter, SilenceStatus};

/// The outcome of one successful sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Silences loaded into the cache.
    pub loaded: usize,
    /// Entries added relative to the previous snapshot.
    pub added: usize,
    /// Entries removed relative to the previous snapshot.
    pub removed: usize,
    /// Pending silences whose window opened and were promoted to active.
    pub promoted: usize,
    /// Pending silences whose window passed unseen, marked expired.
    pub lapsed: usize,
}

/// Periodic task that rebuilds the cache from the store.
#[derive(Clone)]
pub struct SyncWorker {
    store: Arc<dyn SilenceStore>,
    cache: Arc<ActiveSilenceCache>,
    metrics: Arc<SilenceMetrics>,
    interval: Duration,
    max_silences: usize,
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("interval", &self.interval)
            .field("max_silences", &self.max_silences)
            .finish_non_exhaustive()
    }
}

impl SyncWorker {
    /// Creates a worker from the subsystem configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn SilenceStore>,
        cache: Arc<ActiveSilenceCache>,
        metrics: Arc<SilenceMetrics>,
        config: &SilenceConfig,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
            interval: config.sync_interval(),
            max_silences: config.sync_max_silences,
        }
    }

    /// Runs immediately, then on every tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_silences = self.max_silences,
            "sync worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Failures are logged inside; the previous cache stays in force.
            let _ = self.run_once().await;
        }

        info!("sync worker stopped");
    }

    /// Executes one sync synchronously.
    ///
    /// # Errors
    ///
    /// Returns the store error if the active set could not be loaded; the
    /// cache is left untouched in that case.
    pub async fn run_once(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let since = self.cache.generation();

        let mut silences = match self
            .store
            .list_silences(&SilenceFilter::active().limit(self.max_silences))
            .await
        {
            Ok(silences) => silences,
            Err(e) => {
                self.metrics.record_sync_failure(started.elapsed());
                warn!(error = %e, "sync failed to load active silences, keeping previous cache");
                return Err(e);
            }
        };

        if silences.len() >= self.max_silences {
            warn!(
                limit = self.max_silences,
                "active silence count reached the sync limit, cache may be incomplete"
            );
        }

        let promoted = self.promote_due_pending().await;
        let promoted_count = promoted.len();
        silences.extend(promoted);
        let lapsed = self.expire_lapsed_pending().await;

        let loaded = silences.len();
        let delta = self.cache.rebuild(silences, since);

        let report = SyncReport {
            loaded,
            added: delta.added.len(),
            removed: delta.removed.len(),
            promoted: promoted_count,
            lapsed,
        };

        self.metrics.record_sync(
            report.added as u64,
            report.removed as u64,
            report.promoted as u64,
            started.elapsed(),
        );

        if delta.is_empty() && lapsed == 0 {
            debug!(loaded, "cache sync complete, no changes");
        } else {
            info!(
                loaded,
                added = report.added,
                removed = report.removed,
                promoted = report.promoted,
                lapsed = report.lapsed,
                "cache sync complete"
            );
        }

        Ok(report)
    }

    /// Moves pending silences whose window has opened to `active`.
    ///
    /// Only the status is written. Each promoted silence is read back after
    /// the transition so the cache gets any edit made in the meantime. A
    /// failed transition leaves the silence pending for the next run.
    async fn promote_due_pending(&self) -> Vec<Silence> {
        let now = Utc::now();
        let filter = SilenceFilter::new()
            .status(SilenceStatus::Pending)
            .active_at(now)
            .limit(self.max_silences);

        let due = match self.store.list_silences(&filter).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "failed to load pending silences for promotion");
                return Vec::new();
            }
        };

        let mut promoted = Vec::with_capacity(due.len());
        for silence in due {
            match self
                .store
                .transition_status(&silence.id, SilenceStatus::Pending, SilenceStatus::Active)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(silence_id = %silence.id, "pending silence changed concurrently, not promoted");
                    continue;
                }
                Err(e) => {
                    warn!(silence_id = %silence.id, error = %e, "failed to persist pending silence promotion");
                    continue;
                }
            }

            match self.store.get_silence_by_id(&silence.id).await {
                Ok(current) if current.status == SilenceStatus::Active => {
                    debug!(silence_id = %current.id, "promoted pending silence to active");
                    promoted.push(current);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(silence_id = %silence.id, error = %e, "failed to reload promoted silence");
                }
            }
        }

        promoted
    }

    /// Moves pending silences whose whole window has already passed to
    /// `expired`, so the purge phase removes them after retention.
    ///
    /// Returns the number of silences moved.
    async fn expire_lapsed_pending(&self) -> usize {
        let filter = SilenceFilter::new()
            .status(SilenceStatus::Pending)
            .ends_before(Utc::now())
            .limit(self.max_silences);

        let lapsed = match self.store.list_silences(&filter).await {
            Ok(lapsed) => lapsed,
            Err(e) => {
                warn!(error = %e, "failed to load lapsed pending silences");
                return 0;
            }
        };

        let mut expired = 0;
        for silence in lapsed {
            match self
                .store
                .transition_status(&silence.id, SilenceStatus::Pending, SilenceStatus::Expired)
                .await
            {
                Ok(true) => {
                    debug!(silence_id = %silence.id, "pending silence lapsed, marked expired");
                    expired += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(silence_id = %silence.id, error = %e, "failed to expire lapsed pending silence");
                }
            }
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySilenceStore;
    use crate::types::Matcher;
    use chrono::Duration as ChronoDuration;

    fn silence(status: SilenceStatus) -> Silence {
        let mut s = Silence::new(
            vec![Matcher::equal("alertname", "HighCPU")],
            Utc::now() - ChronoDuration::hours(1),
            Utc::now() + ChronoDuration::hours(1),
            "admin",
            "test",
        )
        .unwrap();
        s.status = status;
        s
    }

    fn worker(store: Arc<MemorySilenceStore>, cache: Arc<ActiveSilenceCache>) -> SyncWorker {
        SyncWorker::new(
            store,
            cache,
            Arc::new(SilenceMetrics::new()),
            &SilenceConfig::default(),
        )
    }

    #[tokio::test]
    async fn sync_loads_only_active() {
        let store = Arc::new(MemorySilenceStore::new());
        let active = store.create_silence(silence(SilenceStatus::Active)).await.unwrap();
        store.create_silence(silence(SilenceStatus::Expired)).await.unwrap();
        let cache = Arc::new(ActiveSilenceCache::new());

        let report = worker(store, Arc::clone(&cache)).run_once().await.unwrap();

        assert_eq!(report.loaded, 1);
        assert_eq!(report.added, 1);
        assert!(cache.get(&active.id).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn sync_drops_entries_gone_from_store() {
        let store = Arc::new(MemorySilenceStore::new());
        let cache = Arc::new(ActiveSilenceCache::new());
        let mut stale = silence(SilenceStatus::Active);
        stale.id = "stale".to_string();
        cache.set(stale);

        let report = worker(store, Arc::clone(&cache)).run_once().await.unwrap();

        assert_eq!(report.removed, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn sync_promotes_due_pending() {
        let store = Arc::new(MemorySilenceStore::new());
        let pending = store.create_silence(silence(SilenceStatus::Pending)).await.unwrap();
        let mut future = silence(SilenceStatus::Pending);
        future.starts_at = Utc::now() + ChronoDuration::hours(1);
        future.ends_at = Utc::now() + ChronoDuration::hours(2);
        let future = store.create_silence(future).await.unwrap();
        let cache = Arc::new(ActiveSilenceCache::new());

        let report = worker(Arc::clone(&store), Arc::clone(&cache))
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.promoted, 1);
        assert!(cache.get(&pending.id).is_some());
        assert!(cache.get(&future.id).is_none());
        let stored = store.get_silence_by_id(&pending.id).await.unwrap();
        assert_eq!(stored.status, SilenceStatus::Active);
    }

    #[tokio::test]
    async fn sync_respects_limit() {
        let store = Arc::new(MemorySilenceStore::new());
        for _ in 0..5 {
            store.create_silence(silence(SilenceStatus::Active)).await.unwrap();
        }
        let cache = Arc::new(ActiveSilenceCache::new());
        let config = SilenceConfig {
            sync_max_silences: 3,
            ..Default::default()
        };
        let worker = SyncWorker::new(
            store,
            Arc::clone(&cache),
            Arc::new(SilenceMetrics::new()),
            &config,
        );

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.loaded, 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn sync_expires_lapsed_pending() {
        let store = Arc::new(MemorySilenceStore::new());
        let mut lapsed = silence(SilenceStatus::Pending);
        lapsed.starts_at = Utc::now() - ChronoDuration::hours(50);
        lapsed.ends_at = Utc::now() - ChronoDuration::hours(49);
        let lapsed = store.create_silence(lapsed).await.unwrap();
        let cache = Arc::new(ActiveSilenceCache::new());

        let report = worker(Arc::clone(&store), Arc::clone(&cache))
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.lapsed, 1);
        assert_eq!(report.promoted, 0);
        assert!(cache.get(&lapsed.id).is_none());
        let stored = store.get_silence_by_id(&lapsed.id).await.unwrap();
        assert_eq!(stored.status, SilenceStatus::Expired);

        // Now eligible for the retention purge.
        let expiry = crate::expiry::ExpiryWorker::new(
            Arc::clone(&store) as Arc<dyn SilenceStore>,
            Arc::new(SilenceMetrics::new()),
            &SilenceConfig::default(),
        );
        let purge = expiry.run_at(Utc::now() + ChronoDuration::days(30)).await;
        assert_eq!(purge.purged, 1);
        assert!(store.is_empty());
    }

    /// Store that applies an operator edit right after the first pending
    /// listing, before the worker writes anything back.
    #[derive(Default)]
    struct EditDuringSyncStore {
        inner: MemorySilenceStore,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl SilenceStore for EditDuringSyncStore {
        async fn create_silence(&self, silence: Silence) -> Result<Silence> {
            self.inner.create_silence(silence).await
        }

        async fn get_silence_by_id(&self, id: &str) -> Result<Silence> {
            self.inner.get_silence_by_id(id).await
        }

        async fn update_silence(&self, silence: &Silence) -> Result<()> {
            self.inner.update_silence(silence).await
        }

        async fn transition_status(
            &self,
            id: &str,
            from: SilenceStatus,
            to: SilenceStatus,
        ) -> Result<bool> {
            self.inner.transition_status(id, from, to).await
        }

        async fn delete_silence(&self, id: &str) -> Result<()> {
            self.inner.delete_silence(id).await
        }

        async fn list_silences(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
            let listed = self.inner.list_silences(filter).await?;
            let pending_only = filter.statuses == [SilenceStatus::Pending];
            if pending_only && self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                for silence in &listed {
                    let mut edited = silence.clone();
                    edited.comment = "extended by operator".to_string();
                    edited.ends_at += ChronoDuration::hours(5);
                    self.inner.update_silence(&edited).await?;
                }
            }
            Ok(listed)
        }

        async fn expire_silences(
            &self,
            before: chrono::DateTime<Utc>,
            hard_delete: bool,
            limit: usize,
        ) -> Result<u64> {
            self.inner.expire_silences(before, hard_delete, limit).await
        }

        async fn count_silences(&self, filter: &SilenceFilter) -> Result<i64> {
            self.inner.count_silences(filter).await
        }
    }

    #[tokio::test]
    async fn promotion_keeps_concurrent_edit() {
        let store = Arc::new(EditDuringSyncStore::default());
        let mut pending = silence(SilenceStatus::Pending);
        pending.comment = "original".to_string();
        let created = store.create_silence(pending).await.unwrap();
        store.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let cache = Arc::new(ActiveSilenceCache::new());
        let worker = SyncWorker::new(
            Arc::clone(&store) as Arc<dyn SilenceStore>,
            Arc::clone(&cache),
            Arc::new(SilenceMetrics::new()),
            &SilenceConfig::default(),
        );

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.promoted, 1);

        let stored = store.get_silence_by_id(&created.id).await.unwrap();
        assert_eq!(stored.status, SilenceStatus::Active);
        assert_eq!(stored.comment, "extended by operator");
        assert_eq!(stored.ends_at, created.ends_at + ChronoDuration::hours(5));

        let cached = cache.get(&created.id).unwrap();
        assert_eq!(cached.comment, "extended by operator");
        assert_eq!(cached.ends_at, stored.ends_at);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = Arc::new(MemorySilenceStore::new());
        let cache = Arc::new(ActiveSilenceCache::new());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(worker(store, Arc::clone(&cache)).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(joined.is_ok());
        // The immediate first run happened before the cancel.
        assert!(cache.stats().last_sync_time.is_some());
    }
}
