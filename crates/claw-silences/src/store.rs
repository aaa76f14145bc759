//! Persistent storage contract for silences.
//!
//! This module provides the [`SilenceStore`] trait the coordinator and the
//! workers talk to, and [`MemorySilenceStore`], an in-process backend for
//! single-node deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SilenceError};
use crate::types::{Silence, SilenceFilter, SilenceStatus};

/// Trait for silence storage backends.
///
/// Implementors are expected to be transactional per call; the subsystem
/// never holds a lock of its own across a store call.
#[async_trait]
pub trait SilenceStore: Send + Sync {
    /// Persists a new silence and returns the stored record.
    ///
    /// The store assigns `id` when it is empty, and sets `created_at` and
    /// `updated_at`.
    async fn create_silence(&self, silence: Silence) -> Result<Silence>;

    /// Fetches a silence by ID.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID.
    async fn get_silence_by_id(&self, id: &str) -> Result<Silence>;

    /// Replaces a stored silence.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID.
    async fn update_silence(&self, silence: &Silence) -> Result<()>;

    /// Moves a silence from `from` to `to` without touching any other field.
    ///
    /// Returns `false`, leaving the record unchanged, if its current status
    /// is not `from`. Background transitions use this instead of
    /// [`update_silence`](Self::update_silence) so a concurrent edit is never
    /// overwritten by a stale copy.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID.
    async fn transition_status(
        &self,
        id: &str,
        from: SilenceStatus,
        to: SilenceStatus,
    ) -> Result<bool>;

    /// Removes a silence immediately.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::SilenceNotFound` for an unknown ID.
    async fn delete_silence(&self, id: &str) -> Result<()>;

    /// Lists silences matching a filter, ordered by creation time then ID.
    async fn list_silences(&self, filter: &SilenceFilter) -> Result<Vec<Silence>>;

    /// Garbage-collection primitive shared by both expiry phases.
    ///
    /// With `hard_delete = false`, moves up to `limit` records with
    /// `status = active AND ends_at <= before` to `expired`. With
    /// `hard_delete = true`, deletes up to `limit` records with
    /// `status = expired AND ends_at <= before`. Returns the number of
    /// records affected.
    async fn expire_silences(
        &self,
        before: DateTime<Utc>,
        hard_delete: bool,
        limit: usize,
    ) -> Result<u64>;

    /// Counts silences matching a filter, ignoring pagination.
    async fn count_silences(&self, filter: &SilenceFilter) -> Result<i64>;
}

/// In-memory [`SilenceStore`].
#[derive(Debug, Default)]
pub struct MemorySilenceStore {
    silences: RwLock<HashMap<String, Silence>>,
}

impl MemorySilenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored silences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.silences.read().len()
    }

    /// Returns true if the store holds no silences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.silences.read().is_empty()
    }

    fn sorted_matches(&self, filter: &SilenceFilter) -> Vec<Silence> {
        let silences = self.silences.read();
        let mut matched: Vec<Silence> = silences
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        drop(silences);

        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matched
    }
}

#[async_trait]
impl SilenceStore for MemorySilenceStore {
    async fn create_silence(&self, mut silence: Silence) -> Result<Silence> {
        let now = Utc::now();
        if silence.id.is_empty() {
            silence.id = Uuid::new_v4().to_string();
        }
        silence.created_at = now;
        silence.updated_at = now;

        let mut silences = self.silences.write();
        if silences.contains_key(&silence.id) {
            return Err(SilenceError::Store {
                reason: format!("silence with ID '{}' already exists", silence.id),
            });
        }
        silences.insert(silence.id.clone(), silence.clone());

        Ok(silence)
    }

    async fn get_silence_by_id(&self, id: &str) -> Result<Silence> {
        let silences = self.silences.read();
        silences
            .get(id)
            .cloned()
            .ok_or_else(|| SilenceError::not_found(id))
    }

    async fn update_silence(&self, silence: &Silence) -> Result<()> {
        let mut silences = self.silences.write();
        let stored = silences
            .get_mut(&silence.id)
            .ok_or_else(|| SilenceError::not_found(&silence.id))?;

        let created_at = stored.created_at;
        *stored = silence.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();

        Ok(())
    }

    async fn transition_status(
        &self,
        id: &str,
        from: SilenceStatus,
        to: SilenceStatus,
    ) -> Result<bool> {
        let mut silences = self.silences.write();
        let stored = silences
            .get_mut(id)
            .ok_or_else(|| SilenceError::not_found(id))?;

        if stored.status != from {
            return Ok(false);
        }
        stored.status = to;
        stored.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_silence(&self, id: &str) -> Result<()> {
        let mut silences = self.silences.write();
        silences
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SilenceError::not_found(id))
    }

    async fn list_silences(&self, filter: &SilenceFilter) -> Result<Vec<Silence>> {
        let matched = self.sorted_matches(filter);
        let page = matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    async fn expire_silences(
        &self,
        before: DateTime<Utc>,
        hard_delete: bool,
        limit: usize,
    ) -> Result<u64> {
        let precondition = if hard_delete {
            SilenceStatus::Expired
        } else {
            SilenceStatus::Active
        };

        let mut silences = self.silences.write();
        let targets: Vec<String> = silences
            .values()
            .filter(|s| s.status == precondition && s.ends_at <= before)
            .take(limit)
            .map(|s| s.id.clone())
            .collect();

        let now = Utc::now();
        for id in &targets {
            if hard_delete {
                silences.remove(id);
            } else if let Some(silence) = silences.get_mut(id) {
                silence.status = SilenceStatus::Expired;
                silence.updated_at = now;
            }
        }

        debug!(
            hard_delete,
            affected = targets.len(),
            before = %before,
            "expire_silences applied"
        );

        Ok(targets.len() as u64)
    }

    async fn count_silences(&self, filter: &SilenceFilter) -> Result<i64> {
        let silences = self.silences.read();
        let count = silences.values().filter(|s| filter.matches(s)).count();
        Ok(count as i64)
    }
}
