//! Counters for the silencing subsystem.
//!
//! [`SilenceMetrics`] is a set of lock-free counters shared by the
//! coordinator and both workers. Exporters read it through
//! [`SilenceMetrics::snapshot`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Upper bounds, in microseconds, of the operation latency buckets.
///
/// A call lands in the first bucket whose bound is at least its latency.
/// Calls slower than the last bound land in one extra overflow bucket.
pub const LATENCY_BUCKETS_US: [u64; 9] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000,
];

const BUCKET_COUNT: usize = LATENCY_BUCKETS_US.len() + 1;

/// Coordinator operations with their own call/latency counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// `create_silence`.
    Create,
    /// `get_silence`.
    Get,
    /// `update_silence`.
    Update,
    /// `delete_silence`.
    Delete,
    /// `list_silences`.
    List,
    /// `count_silences`.
    Count,
    /// `expire_silence`.
    Expire,
    /// `is_alert_silenced`.
    IsAlertSilenced,
}

impl OperationKind {
    /// All operation kinds.
    pub const ALL: [Self; 8] = [
        Self::Create,
        Self::Get,
        Self::Update,
        Self::Delete,
        Self::List,
        Self::Count,
        Self::Expire,
        Self::IsAlertSilenced,
    ];

    /// Returns the operation name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Count => "count",
            Self::Expire => "expire",
            Self::IsAlertSilenced => "is_alert_silenced",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// The two phases of an expiry worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    /// Active silences past their end are marked expired.
    Expire,
    /// Expired silences past retention are deleted.
    Purge,
}

impl GcPhase {
    /// Returns the phase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expire => "expire",
            Self::Purge => "purge",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for GcPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
struct OperationCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    buckets: [AtomicU64; BUCKET_COUNT],
}

impl OperationCounters {
    fn record(&self, elapsed: Duration, ok: bool) {
        let micros = duration_micros(elapsed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
        self.buckets[bucket_index(micros)].fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_latency_us: self.total_latency_us.load(Ordering::Relaxed),
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
            latency_buckets: std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Default)]
struct PhaseCounters {
    runs: AtomicU64,
    failures: AtomicU64,
    cleaned: AtomicU64,
    total_duration_us: AtomicU64,
}

/// Call count and latency of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    /// Number of calls.
    pub calls: u64,
    /// Number of calls that returned an error.
    pub errors: u64,
    /// Sum of call latencies in microseconds.
    pub total_latency_us: u64,
    /// Largest single call latency in microseconds.
    pub max_latency_us: u64,
    /// Call counts per latency bucket, indexed like [`LATENCY_BUCKETS_US`]
    /// with the overflow bucket last.
    pub latency_buckets: [u64; BUCKET_COUNT],
}

impl OperationSnapshot {
    /// Estimates a latency quantile from the buckets.
    ///
    /// Returns the upper bound of the bucket holding the `q`th call, or
    /// `max_latency_us` when that call sits in the overflow bucket. Returns
    /// `None` before the first call.
    #[must_use]
    pub fn latency_quantile_us(&self, q: f64) -> Option<u64> {
        if self.calls == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rank = ((q.clamp(0.0, 1.0) * self.calls as f64).ceil() as u64).max(1);

        let mut seen = 0;
        for (i, count) in self.latency_buckets.iter().enumerate() {
            seen += count;
            if seen >= rank {
                let bound = LATENCY_BUCKETS_US.get(i).copied();
                return Some(bound.unwrap_or(self.max_latency_us));
            }
        }
        Some(self.max_latency_us)
    }
}

/// Counters of one GC phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseSnapshot {
    /// Number of times the phase ran.
    pub runs: u64,
    /// Number of runs that failed.
    pub failures: u64,
    /// Records expired or purged.
    pub cleaned: u64,
    /// Sum of run durations in microseconds.
    pub total_duration_us: u64,
}

/// Counters of the sync worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    /// Number of sync runs.
    pub runs: u64,
    /// Number of runs that failed to query the store.
    pub failures: u64,
    /// Cache entries added across runs.
    pub added: u64,
    /// Cache entries removed across runs.
    pub removed: u64,
    /// Pending silences promoted to active.
    pub promoted: u64,
    /// Sum of run durations in microseconds.
    pub total_duration_us: u64,
}

/// Outcomes of alert filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSnapshot {
    /// Alerts found silenced.
    pub silenced: u64,
    /// Alerts found not silenced.
    pub not_silenced: u64,
    /// Checks that failed open.
    pub fail_open: u64,
    /// Silences skipped because their matchers could not be evaluated.
    pub evaluation_errors: u64,
}

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Per-operation counters.
    pub operations: HashMap<OperationKind, OperationSnapshot>,
    /// Cache lookups answered from memory.
    pub cache_hits: u64,
    /// Cache lookups that fell through to the store.
    pub cache_misses: u64,
    /// Per-phase GC counters.
    pub gc: HashMap<GcPhase, PhaseSnapshot>,
    /// Sync worker counters.
    pub sync: SyncSnapshot,
    /// Alert filtering outcomes.
    pub checks: CheckSnapshot,
}

/// Lock-free counters for the silencing subsystem.
#[derive(Debug, Default)]
pub struct SilenceMetrics {
    operations: [OperationCounters; OperationKind::ALL.len()],
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    gc: [PhaseCounters; 2],
    sync_runs: AtomicU64,
    sync_failures: AtomicU64,
    sync_added: AtomicU64,
    sync_removed: AtomicU64,
    sync_promoted: AtomicU64,
    sync_duration_us: AtomicU64,
    silenced: AtomicU64,
    not_silenced: AtomicU64,
    fail_open: AtomicU64,
    evaluation_errors: AtomicU64,
}

impl SilenceMetrics {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call of a coordinator operation.
    pub fn record_operation(&self, kind: OperationKind, elapsed: Duration, ok: bool) {
        self.operations[kind.index()].record(elapsed, ok);
    }

    /// Records a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one GC phase run.
    pub fn record_gc_phase(&self, phase: GcPhase, cleaned: u64, elapsed: Duration, ok: bool) {
        let counters = &self.gc[phase.index()];
        counters.runs.fetch_add(1, Ordering::Relaxed);
        if !ok {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters.cleaned.fetch_add(cleaned, Ordering::Relaxed);
        counters
            .total_duration_us
            .fetch_add(duration_micros(elapsed), Ordering::Relaxed);
    }

    /// Records one successful sync run.
    pub fn record_sync(&self, added: u64, removed: u64, promoted: u64, elapsed: Duration) {
        self.sync_runs.fetch_add(1, Ordering::Relaxed);
        self.sync_added.fetch_add(added, Ordering::Relaxed);
        self.sync_removed.fetch_add(removed, Ordering::Relaxed);
        self.sync_promoted.fetch_add(promoted, Ordering::Relaxed);
        self.sync_duration_us
            .fetch_add(duration_micros(elapsed), Ordering::Relaxed);
    }

    /// Records one failed sync run.
    pub fn record_sync_failure(&self, elapsed: Duration) {
        self.sync_runs.fetch_add(1, Ordering::Relaxed);
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
        self.sync_duration_us
            .fetch_add(duration_micros(elapsed), Ordering::Relaxed);
    }

    /// Records the outcome of an alert check.
    pub fn record_check(&self, silenced: bool) {
        if silenced {
            self.silenced.fetch_add(1, Ordering::Relaxed);
        } else {
            self.not_silenced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an alert check that failed open.
    pub fn record_fail_open(&self) {
        self.fail_open.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a silence skipped because its matchers failed to evaluate.
    pub fn record_evaluation_error(&self) {
        self.evaluation_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = OperationKind::ALL
            .iter()
            .map(|kind| (*kind, self.operations[kind.index()].snapshot()))
            .collect();

        let gc = [GcPhase::Expire, GcPhase::Purge]
            .iter()
            .map(|phase| {
                let c = &self.gc[phase.index()];
                (
                    *phase,
                    PhaseSnapshot {
                        runs: c.runs.load(Ordering::Relaxed),
                        failures: c.failures.load(Ordering::Relaxed),
                        cleaned: c.cleaned.load(Ordering::Relaxed),
                        total_duration_us: c.total_duration_us.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            operations,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            gc,
            sync: SyncSnapshot {
                runs: self.sync_runs.load(Ordering::Relaxed),
                failures: self.sync_failures.load(Ordering::Relaxed),
                added: self.sync_added.load(Ordering::Relaxed),
                removed: self.sync_removed.load(Ordering::Relaxed),
                promoted: self.sync_promoted.load(Ordering::Relaxed),
                total_duration_us: self.sync_duration_us.load(Ordering::Relaxed),
            },
            checks: CheckSnapshot {
                silenced: self.silenced.load(Ordering::Relaxed),
                not_silenced: self.not_silenced.load(Ordering::Relaxed),
                fail_open: self.fail_open.load(Ordering::Relaxed),
                evaluation_errors: self.evaluation_errors.load(Ordering::Relaxed),
            },
        }
    }
}

fn bucket_index(micros: u64) -> usize {
    LATENCY_BUCKETS_US.partition_point(|bound| *bound < micros)
}

fn duration_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
