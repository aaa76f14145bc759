//! Silence coordinator: the entry point of the silencing subsystem.
//!
//! This module provides the [`SilenceCoordinator`], which owns the
//! active-silence cache and both background workers. It implements CRUD
//! against the store with cache-aware fast paths, alert filtering, and the
//! start/stop lifecycle of the whole subsystem.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ActiveSilenceCache, CacheStats};
use crate::config::SilenceConfig;
use crate::error::{Result, SilenceError};
use crate::expiry::ExpiryWorker;
use crate::matcher::CompiledSilence;
use crate::metrics::{MetricsSnapshot, OperationKind, SilenceMetrics};
use crate::store::SilenceStore;
use crate::sync::SyncWorker;
use crate::types::{Alert, Silence, SilenceCheck, SilenceFilter, SilenceStatus};

/// Lifecycle state of a [`SilenceCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed; `start` has not completed.
    NotStarted = 0,
    /// Serving requests with both workers running.
    Started = 1,
    /// `stop` is waiting for the workers.
    ShuttingDown = 2,
    /// Workers are gone; every operation is rejected.
    Stopped = 3,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }

    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Started => "started",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coordinates silence CRUD, alert filtering, and background maintenance.
///
/// Writes go to the store first and update the cache synchronously on
/// success, so a change is immediately visible to [`get_silence`] and
/// [`is_alert_silenced`] on the same coordinator. Other coordinators sharing
/// the store observe it after their next sync.
///
/// [`get_silence`]: SilenceCoordinator::get_silence
/// [`is_alert_silenced`]: SilenceCoordinator::is_alert_silenced
pub struct SilenceCoordinator {
    config: SilenceConfig,
    store: Arc<dyn SilenceStore>,
    cache: Arc<ActiveSilenceCache>,
    metrics: Arc<SilenceMetrics>,
    state: AtomicU8,
    start_claimed: AtomicBool,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SilenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SilenceCoordinator")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SilenceCoordinator {
    /// Creates a coordinator in the `NotStarted` state.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::InvalidConfig` if the configuration is invalid.
    pub fn new(store: Arc<dyn SilenceStore>, config: SilenceConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            cache: Arc::new(ActiveSilenceCache::new()),
            metrics: Arc::new(SilenceMetrics::new()),
            state: AtomicU8::new(LifecycleState::NotStarted as u8),
            start_claimed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SilenceConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns a summary of the active-silence cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns a copy of the subsystem counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ============ Lifecycle ============

    /// Loads the cache, then spawns the expiry and sync workers.
    ///
    /// A failed initial load is logged and does not prevent startup: the
    /// sync worker retries on its first tick and alert filtering falls back
    /// to the store until the cache has loaded once.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::AlreadyStarted` if `start` was called before.
    pub async fn start(&self) -> Result<()> {
        if self.start_claimed.swap(true, Ordering::AcqRel) {
            return Err(SilenceError::AlreadyStarted);
        }

        let sync = SyncWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.metrics),
            &self.config,
        );
        let expiry = ExpiryWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            &self.config,
        );

        match sync.run_once().await {
            Ok(report) => info!(loaded = report.loaded, "initial silence cache load complete"),
            Err(e) => warn!(error = %e, "initial silence cache load failed, continuing with empty cache"),
        }

        {
            let mut workers = self.workers.lock();
            workers.push(tokio::spawn(expiry.run(self.cancel.child_token())));
            workers.push(tokio::spawn(sync.run(self.cancel.child_token())));
        }

        if self
            .state
            .compare_exchange(
                LifecycleState::NotStarted as u8,
                LifecycleState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // `stop` ran while we were loading; let the workers go.
            self.cancel.cancel();
            return Err(SilenceError::Stopped);
        }

        info!(
            gc_interval_secs = self.config.gc_interval_secs,
            sync_interval_secs = self.config.sync_interval_secs,
            "silence coordinator started"
        );
        Ok(())
    }

    /// Signals both workers to stop and waits for them.
    ///
    /// Calling `stop` again, or on a coordinator that never started, is a
    /// no-op that returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::ShutdownTimeout` if the workers do not finish
    /// within the configured timeout. They are aborted and the coordinator
    /// still ends up `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let previous = self.state.compare_exchange(
            LifecycleState::Started as u8,
            LifecycleState::ShuttingDown as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match previous.map_err(LifecycleState::from_u8) {
            Ok(_) => {}
            Err(LifecycleState::NotStarted) => {
                self.state
                    .store(LifecycleState::Stopped as u8, Ordering::Release);
                self.cancel.cancel();
                debug!("silence coordinator stopped before start");
                return Ok(());
            }
            Err(_) => return Ok(()),
        }

        info!("silence coordinator shutting down");
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let timeout = self.config.shutdown_timeout();
        let joined = tokio::time::timeout(timeout, async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "silence worker terminated abnormally");
                }
            }
        })
        .await;

        self.state
            .store(LifecycleState::Stopped as u8, Ordering::Release);

        if joined.is_err() {
            for abort in aborts {
                abort.abort();
            }
            warn!(
                timeout_secs = self.config.shutdown_timeout_secs,
                "silence workers did not stop in time, aborted"
            );
            return Err(SilenceError::ShutdownTimeout {
                timeout_secs: self.config.shutdown_timeout_secs,
            });
        }

        info!("silence coordinator stopped");
        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Started => Ok(()),
            LifecycleState::NotStarted => Err(SilenceError::NotStarted),
            LifecycleState::ShuttingDown => Err(SilenceError::ShuttingDown),
            LifecycleState::Stopped => Err(SilenceError::Stopped),
        }
    }

    fn observe<T>(&self, kind: OperationKind, started: Instant, result: &Result<T>) {
        self.metrics
            .record_operation(kind, started.elapsed(), result.is_ok());
    }

    // ============ Silence Management ============

    /// Validates and persists a new silence.
    ///
    /// The ID and status are assigned here; the silence enters the cache if
    /// it is active.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed silences, a lifecycle error
    /// outside `Started`, or the store error.
    pub async fn create_silence(&self, silence: Silence) -> Result<Silence> {
        let started = Instant::now();
        let result = self.create_inner(silence).await;
        self.observe(OperationKind::Create, started, &result);
        result
    }

    async fn create_inner(&self, mut silence: Silence) -> Result<Silence> {
        self.ensure_started()?;
        silence.validate()?;

        silence.id.clear();
        silence.status = silence.status_at(Utc::now());

        let stored = self.store.create_silence(silence).await?;
        if stored.status == SilenceStatus::Active {
            self.cache.set(stored.clone());
        }

        info!(
            silence_id = %stored.id,
            status = %stored.status,
            created_by = %stored.created_by,
            ends_at = %stored.ends_at,
            "created silence"
        );
        Ok(stored)
    }

    /// Gets a silence by ID.
    ///
    /// Served from the cache when possible; a miss reads the store and
    /// caches the record if it is active.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID, a
    /// lifecycle error outside `Started`, or the store error.
    pub async fn get_silence(&self, id: &str) -> Result<Silence> {
        let started = Instant::now();
        let result = self.get_inner(id).await;
        self.observe(OperationKind::Get, started, &result);
        result
    }

    async fn get_inner(&self, id: &str) -> Result<Silence> {
        self.ensure_started()?;

        if let Some(silence) = self.cache.get(id) {
            self.metrics.record_cache_hit();
            return Ok(silence);
        }
        self.metrics.record_cache_miss();

        let mut silence = self.store.get_silence_by_id(id).await?;
        silence.status = silence.effective_status(Utc::now());

        if silence.status == SilenceStatus::Active {
            debug!(silence_id = %id, "cache miss for active silence, repopulating");
            self.cache.set(silence.clone());
        }
        Ok(silence)
    }

    /// Replaces a silence.
    ///
    /// The status is recomputed from the new window, so an edit can move a
    /// silence into or out of the cache.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed silences,
    /// `SilenceError::SilenceNotFound` for an unknown ID, a lifecycle error
    /// outside `Started`, or the store error.
    pub async fn update_silence(&self, silence: Silence) -> Result<Silence> {
        let started = Instant::now();
        let result = self.update_inner(silence).await;
        self.observe(OperationKind::Update, started, &result);
        result
    }

    async fn update_inner(&self, mut silence: Silence) -> Result<Silence> {
        self.ensure_started()?;
        if silence.id.is_empty() {
            return Err(SilenceError::invalid("silence ID is required for update"));
        }
        silence.validate()?;

        let existing = self.store.get_silence_by_id(&silence.id).await?;
        let now = Utc::now();
        silence.created_at = existing.created_at;
        silence.updated_at = now;
        silence.status = silence.status_at(now);

        self.store.update_silence(&silence).await?;

        // Replace in place so concurrent readers never see a gap.
        if silence.status == SilenceStatus::Active {
            self.cache.set(silence.clone());
        } else {
            self.cache.delete(&silence.id);
        }

        info!(
            silence_id = %silence.id,
            previous_status = %existing.status,
            status = %silence.status,
            "updated silence"
        );
        Ok(silence)
    }

    /// Deletes a silence immediately, bypassing the expiry lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID, a
    /// lifecycle error outside `Started`, or the store error.
    pub async fn delete_silence(&self, id: &str) -> Result<()> {
        let started = Instant::now();
        let result = self.delete_inner(id).await;
        self.observe(OperationKind::Delete, started, &result);
        result
    }

    async fn delete_inner(&self, id: &str) -> Result<()> {
        self.ensure_started()?;

        let result = self.store.delete_silence(id).await;
        // Evict even on failure: the store is the source of truth and the
        // next sync restores the entry if it still exists.
        self.cache.delete(id);
        result?;

        info!(silence_id = %id, "deleted silence");
        Ok(())
    }

    /// Ends a silence now, keeping the record until it is purged.
    ///
    /// Expiring an already expired silence returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID, a
    /// lifecycle error outside `Started`, or the store error.
    pub async fn expire_silence(&self, id: &str) -> Result<Silence> {
        let started = Instant::now();
        let result = self.expire_inner(id).await;
        self.observe(OperationKind::Expire, started, &result);
        result
    }

    async fn expire_inner(&self, id: &str) -> Result<Silence> {
        self.ensure_started()?;

        let mut silence = self.store.get_silence_by_id(id).await?;
        if silence.status == SilenceStatus::Expired {
            self.cache.delete(id);
            return Ok(silence);
        }

        let now = Utc::now();
        if silence.starts_at >= now {
            // A pending silence never started; keep starts_at < ends_at.
            silence.starts_at = now - chrono::Duration::milliseconds(1);
        }
        silence.ends_at = now;
        silence.status = SilenceStatus::Expired;
        silence.updated_at = now;

        self.store.update_silence(&silence).await?;
        self.cache.delete(id);

        info!(silence_id = %id, "expired silence");
        Ok(silence)
    }

    /// Lists silences matching a filter.
    ///
    /// An unpaginated "active only" filter is answered from the cache;
    /// every other filter goes to the store.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error outside `Started`, or the store error.
    pub async fn list_silences(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
        let started = Instant::now();
        let result = self.list_inner(filter).await;
        self.observe(OperationKind::List, started, &result);
        result
    }

    async fn list_inner(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
        self.ensure_started()?;

        if filter.is_active_only() {
            self.metrics.record_cache_hit();
            let mut silences = self.cache.get_by_status(SilenceStatus::Active);
            silences.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            return Ok(silences);
        }

        self.store.list_silences(filter).await
    }

    /// Counts silences matching a filter.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error outside `Started`, or the store error.
    pub async fn count_silences(&self, filter: &SilenceFilter) -> Result<i64> {
        let started = Instant::now();
        let result = match self.ensure_started() {
            Ok(()) => self.store.count_silences(filter).await,
            Err(e) => Err(e),
        };
        self.observe(OperationKind::Count, started, &result);
        result
    }

    // ============ Alert Filtering ============

    /// Checks an alert against every active silence.
    ///
    /// Every matching silence is collected, not just the first. Until the
    /// cache has loaded once the active set is read from the store. The
    /// check fails open: when the active set cannot be obtained the alert is
    /// reported as not silenced and the cause is attached to
    /// [`SilenceCheck::error`]. A silence whose matchers cannot be evaluated
    /// is logged and skipped. `cancel` is polled every
    /// `cancellation_check_interval` silences; on cancellation the matches
    /// found so far are returned with `SilenceError::Cancelled`.
    pub async fn is_alert_silenced(&self, alert: &Alert, cancel: &CancellationToken) -> SilenceCheck {
        let started = Instant::now();
        let check = self.check_inner(alert, cancel).await;

        self.metrics.record_operation(
            OperationKind::IsAlertSilenced,
            started.elapsed(),
            check.error.is_none(),
        );
        self.metrics.record_check(check.silenced);
        check
    }

    async fn check_inner(&self, alert: &Alert, cancel: &CancellationToken) -> SilenceCheck {
        if let Err(e) = self.ensure_started() {
            self.metrics.record_fail_open();
            return SilenceCheck::fail_open(e);
        }

        let mut candidates = self.cache.active_snapshot();
        // Only a cache that has never loaded is untrustworthy when empty; a
        // synced empty cache means there is nothing active.
        if candidates.is_empty() && !self.cache.has_synced() {
            candidates = match self.load_active_from_store().await {
                Ok(loaded) => loaded,
                Err(e) => {
                    self.metrics.record_fail_open();
                    warn!(error = %e, "failed to load active silences, alert not silenced");
                    return SilenceCheck::fail_open(e);
                }
            };
        }

        self.scan(&candidates, alert, Utc::now(), || cancel.is_cancelled())
    }

    /// Evaluates `candidates` in order, consulting `is_cancelled` before
    /// every `cancellation_check_interval`-th silence.
    fn scan(
        &self,
        candidates: &[Arc<CompiledSilence>],
        alert: &Alert,
        now: DateTime<Utc>,
        mut is_cancelled: impl FnMut() -> bool,
    ) -> SilenceCheck {
        let check_every = self.config.cancellation_check_interval;
        let mut matched = Vec::new();

        for (i, entry) in candidates.iter().enumerate() {
            if i % check_every == 0 && is_cancelled() {
                debug!(evaluated = i, total = candidates.len(), "alert check cancelled");
                return SilenceCheck::from_matches(matched).with_error(SilenceError::Cancelled);
            }

            if !entry.silence().is_active_at(now) {
                continue;
            }

            match entry.matches(alert) {
                Ok(true) => matched.push(entry.id().to_string()),
                Ok(false) => {}
                Err(e) => {
                    self.metrics.record_evaluation_error();
                    warn!(silence_id = %entry.id(), error = %e, "skipping silence with unevaluable matchers");
                }
            }
        }

        SilenceCheck::from_matches(matched)
    }

    async fn load_active_from_store(&self) -> Result<Vec<Arc<CompiledSilence>>> {
        let filter = SilenceFilter::active().limit(self.config.sync_max_silences);
        let silences = self.store.list_silences(&filter).await?;
        debug!(loaded = silences.len(), "alert check served from store, cache empty");
        Ok(silences
            .into_iter()
            .map(|s| Arc::new(CompiledSilence::new(s)))
            .collect())
    }
}

impl Drop for SilenceCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
