//! In-memory index of active silences.
//!
//! The [`ActiveSilenceCache`] is read-mostly: alert filtering and `get`
//! lookups take the read lock, while the coordinator's targeted writes and
//! the sync worker's bulk [`ActiveSilenceCache::rebuild`] take the write lock
//! for an in-memory critical section only.
//!
//! Targeted writes bump a generation counter. A rebuild is given the
//! generation observed before its store query began, and re-applies any
//! targeted write newer than that on top of the loaded snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::matcher::CompiledSilence;
use crate::types::{Silence, SilenceStatus};

/// A point-in-time summary of the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cached silences.
    pub size: usize,
    /// When the cache was last rebuilt from the store.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Number of cached silences per status.
    pub counts_by_status: HashMap<SilenceStatus, usize>,
}

/// Entries added and removed by a [`ActiveSilenceCache::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildDelta {
    /// IDs present after the rebuild but not before.
    pub added: Vec<String>,
    /// IDs present before the rebuild but not after.
    pub removed: Vec<String>,
}

impl RebuildDelta {
    /// Returns true if the rebuild changed the key set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Arc<CompiledSilence>>,
    by_status: HashMap<SilenceStatus, HashSet<String>>,
    last_sync: Option<DateTime<Utc>>,
    generation: u64,
    // Generation of the last targeted set or delete per ID.
    touched: HashMap<String, u64>,
}

impl CacheState {
    fn from_silences(silences: Vec<Silence>, synced_at: DateTime<Utc>) -> Self {
        let mut state = Self {
            entries: HashMap::with_capacity(silences.len()),
            by_status: HashMap::new(),
            last_sync: Some(synced_at),
            generation: 0,
            touched: HashMap::new(),
        };
        for silence in silences {
            state.insert(silence);
        }
        state
    }

    fn insert(&mut self, silence: Silence) {
        self.insert_compiled(Arc::new(CompiledSilence::new(silence)));
    }

    fn insert_compiled(&mut self, entry: Arc<CompiledSilence>) {
        let id = entry.id().to_string();
        let status = entry.silence().status;

        if let Some(previous) = self.entries.get(&id) {
            let previous_status = previous.silence().status;
            if previous_status != status {
                self.unindex(&id, previous_status);
            }
        }

        self.by_status.entry(status).or_default().insert(id.clone());
        self.entries.insert(id, entry);
    }

    fn touch(&mut self, id: &str) {
        self.generation += 1;
        self.touched.insert(id.to_string(), self.generation);
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(entry) => {
                self.unindex(id, entry.silence().status);
                true
            }
            None => false,
        }
    }

    fn unindex(&mut self, id: &str, status: SilenceStatus) {
        if let Some(ids) = self.by_status.get_mut(&status) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_status.remove(&status);
            }
        }
    }
}

/// Thread-safe cache of the silences currently believed to be active.
///
/// Entries are indexed by ID and by status; both indexes are updated under
/// the same write lock so readers never observe them out of step.
#[derive(Debug, Default)]
pub struct ActiveSilenceCache {
    state: RwLock<CacheState>,
}

impl ActiveSilenceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a silence by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Silence> {
        let state = self.state.read();
        state.entries.get(id).map(|e| e.silence().clone())
    }

    /// Inserts or replaces a silence.
    pub fn set(&self, silence: Silence) {
        let mut state = self.state.write();
        state.touch(&silence.id);
        state.insert(silence);
    }

    /// Removes a silence by ID.
    ///
    /// Returns `true` if an entry was removed.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.write();
        state.touch(id);
        state.remove(id)
    }

    /// Returns the current write generation.
    ///
    /// Read this before querying the store for a [`rebuild`](Self::rebuild).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Returns every cached silence with the given status.
    #[must_use]
    pub fn get_by_status(&self, status: SilenceStatus) -> Vec<Silence> {
        let state = self.state.read();
        state
            .by_status
            .get(&status)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.entries.get(id))
                    .map(|e| e.silence().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every cached silence.
    #[must_use]
    pub fn get_all(&self) -> Vec<Silence> {
        let state = self.state.read();
        state.entries.values().map(|e| e.silence().clone()).collect()
    }

    /// Returns the compiled form of every cached `active` silence.
    ///
    /// Only `Arc`s are cloned, so the read lock is held briefly even for
    /// large caches.
    #[must_use]
    pub fn active_snapshot(&self) -> Vec<Arc<CompiledSilence>> {
        let state = self.state.read();
        state
            .by_status
            .get(&SilenceStatus::Active)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.entries.get(id))
                    .map(Arc::clone)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Atomically replaces the entire contents.
    ///
    /// `since` is the [`generation`](Self::generation) read before the
    /// silences were loaded. Targeted writes made after it win over the
    /// loaded snapshot, so a rebuild never undoes a concurrent create,
    /// update, or delete.
    ///
    /// The new snapshot, including compiled matchers, is built before the
    /// write lock is taken; the lock only covers the merge and swap.
    pub fn rebuild(&self, silences: Vec<Silence>, since: u64) -> RebuildDelta {
        let mut fresh = CacheState::from_silences(silences, Utc::now());
        let new_ids: HashSet<String>;

        let previous = {
            let mut state = self.state.write();
            fresh.generation = state.generation;
            for (id, generation) in &state.touched {
                if *generation <= since {
                    continue;
                }
                match state.entries.get(id) {
                    Some(entry) => fresh.insert_compiled(Arc::clone(entry)),
                    None => {
                        fresh.remove(id);
                    }
                }
                fresh.touched.insert(id.clone(), *generation);
            }
            new_ids = fresh.entries.keys().cloned().collect();
            std::mem::replace(&mut *state, fresh)
        };

        let added = new_ids
            .iter()
            .filter(|id| !previous.entries.contains_key(*id))
            .cloned()
            .collect();
        let removed = previous
            .entries
            .keys()
            .filter(|id| !new_ids.contains(*id))
            .cloned()
            .collect();

        RebuildDelta { added, removed }
    }

    /// Returns a summary of the cache contents.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            size: state.entries.len(),
            last_sync_time: state.last_sync,
            counts_by_status: state
                .by_status
                .iter()
                .map(|(status, ids)| (*status, ids.len()))
                .collect(),
        }
    }

    /// Returns true once a rebuild has completed.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.state.read().last_sync.is_some()
    }

    /// Returns the number of cached silences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if the cache holds no silences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}
