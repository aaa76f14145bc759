//! Test helpers for silence integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use claw_silences::{
    Matcher, MemorySilenceStore, Result, Silence, SilenceConfig, SilenceCoordinator,
    SilenceError, SilenceFilter, SilenceStatus, SilenceStore,
};

/// Default test timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Store wrapper that can be told to fail or stall.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemorySilenceStore,
    failing: AtomicBool,
    list_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreUnavailable`.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Lets calls through again.
    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Delays every subsequent `list_silences` call.
    pub fn stall_lists(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of records held, bypassing failure injection.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SilenceError::StoreUnavailable {
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SilenceStore for FlakyStore {
    async fn create_silence(&self, silence: Silence) -> Result<Silence> {
        self.check()?;
        self.inner.create_silence(silence).await
    }

    async fn get_silence_by_id(&self, id: &str) -> Result<Silence> {
        self.check()?;
        self.inner.get_silence_by_id(id).await
    }

    async fn update_silence(&self, silence: &Silence) -> Result<()> {
        self.check()?;
        self.inner.update_silence(silence).await
    }

    async fn transition_status(
        &self,
        id: &str,
        from: SilenceStatus,
        to: SilenceStatus,
    ) -> Result<bool> {
        self.check()?;
        self.inner.transition_status(id, from, to).await
    }

    async fn delete_silence(&self, id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_silence(id).await
    }

    async fn list_silences(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.inner.list_silences(filter).await
    }

    async fn expire_silences(
        &self,
        before: DateTime<Utc>,
        hard_delete: bool,
        limit: usize,
    ) -> Result<u64> {
        self.check()?;
        self.inner.expire_silences(before, hard_delete, limit).await
    }

    async fn count_silences(&self, filter: &SilenceFilter) -> Result<i64> {
        self.check()?;
        self.inner.count_silences(filter).await
    }
}

/// Configuration with short intervals for tests.
pub fn test_config() -> SilenceConfig {
    SilenceConfig {
        gc_interval_secs: 1,
        sync_interval_secs: 1,
        shutdown_timeout_secs: 2,
        ..Default::default()
    }
}

/// A silence for `alertname` covering the past and the next hour.
pub fn silence_for(alertname: &str) -> Silence {
    Silence::new(
        vec![Matcher::equal("alertname", alertname)],
        Utc::now() - ChronoDuration::minutes(5),
        Utc::now() + ChronoDuration::hours(1),
        "oncall",
        "integration test",
    )
    .unwrap()
}

/// A silence with the given matchers covering the next hour.
pub fn silence_with(matchers: Vec<Matcher>) -> Silence {
    Silence::new(
        matchers,
        Utc::now() - ChronoDuration::minutes(5),
        Utc::now() + ChronoDuration::hours(1),
        "oncall",
        "integration test",
    )
    .unwrap()
}

/// Starts a coordinator over a fresh flaky store.
pub async fn start_coordinator() -> (Arc<SilenceCoordinator>, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let coordinator = SilenceCoordinator::new(
        Arc::clone(&store) as Arc<dyn SilenceStore>,
        test_config(),
    )
    .unwrap();
    coordinator.start().await.unwrap();
    (Arc::new(coordinator), store)
}
