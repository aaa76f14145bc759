//! Core types for the silencing subsystem.
//!
//! This module provides the fundamental types used throughout the claw-silences crate:
//! - [`SilenceStatus`]: The lifecycle state of a silence
//! - [`Matcher`]: A single label comparison
//! - [`Silence`]: A time-bounded rule suppressing matching alerts
//! - [`Alert`]: The label set of an alert being checked
//! - [`SilenceFilter`]: Query shape for listing and counting silences
//! - [`SilenceCheck`]: The outcome of an alert-filtering call

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SilenceError};
use crate::matcher::MatcherSet;

/// The lifecycle state of a silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceStatus {
    /// The silence window has not started yet.
    Pending,
    /// The silence is currently suppressing matching alerts.
    Active,
    /// The silence window has ended.
    Expired,
}

impl SilenceStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::Active, Self::Expired];

    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Computes the status of a window `[starts_at, ends_at)` at `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        if now < starts_at {
            Self::Pending
        } else if now < ends_at {
            Self::Active
        } else {
            Self::Expired
        }
    }
}

impl std::fmt::Display for SilenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single label comparison.
///
/// `is_equal = false` inverts the comparison (not-equal / not-matching-regex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Matcher {
    /// The label name to compare.
    pub label_name: String,
    /// The literal value or regex pattern.
    pub value: String,
    /// Whether `value` is a regex pattern.
    pub is_regex: bool,
    /// Whether the comparison is positive.
    pub is_equal: bool,
}

impl Matcher {
    /// Creates a `name="value"` matcher.
    pub fn equal(label_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label_name, value, false, true)
    }

    /// Creates a `name!="value"` matcher.
    pub fn not_equal(label_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label_name, value, false, false)
    }

    /// Creates a `name=~"pattern"` matcher.
    pub fn regex(label_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(label_name, pattern, true, true)
    }

    /// Creates a `name!~"pattern"` matcher.
    pub fn not_regex(label_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(label_name, pattern, true, false)
    }

    fn new(
        label_name: impl Into<String>,
        value: impl Into<String>,
        is_regex: bool,
        is_equal: bool,
    ) -> Self {
        Self {
            label_name: label_name.into(),
            value: value.into(),
            is_regex,
            is_equal,
        }
    }

    /// Returns the operator symbol for this matcher.
    #[must_use]
    pub const fn operator(&self) -> &'static str {
        match (self.is_regex, self.is_equal) {
            (false, true) => "=",
            (false, false) => "!=",
            (true, true) => "=~",
            (true, false) => "!~",
        }
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{:?}", self.label_name, self.operator(), self.value)
    }
}

/// A time-bounded rule suppressing notifications for matching alerts.
///
/// `status` is persisted for query efficiency and may lag
/// [`Silence::status_at`] by up to one maintenance cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    /// Unique identifier, assigned by the store.
    pub id: String,
    /// Label matchers; an alert must satisfy all of them.
    pub matchers: Vec<Matcher>,
    /// Who created the silence.
    pub created_by: String,
    /// Comment explaining the silence.
    pub comment: String,
    /// When the silence starts.
    pub starts_at: DateTime<Utc>,
    /// When the silence ends.
    pub ends_at: DateTime<Utc>,
    /// The persisted lifecycle state.
    pub status: SilenceStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Silence {
    /// Maximum allowed length for comments.
    pub const MAX_COMMENT_LENGTH: usize = 4096;

    /// Creates a new, not yet persisted silence.
    ///
    /// The ID is left empty for the store to assign, and the status is
    /// computed from the current time.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the silence is malformed (see [`Silence::validate`]).
    pub fn new(
        matchers: Vec<Matcher>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        created_by: impl Into<String>,
        comment: impl Into<String>,
    ) -> Result<Self> {
        let now = Utc::now();
        let silence = Self {
            id: String::new(),
            matchers,
            created_by: created_by.into(),
            comment: comment.into(),
            starts_at,
            ends_at,
            status: SilenceStatus::at(now, starts_at, ends_at),
            created_at: now,
            updated_at: now,
        };
        silence.validate()?;
        Ok(silence)
    }

    /// Validates the silence.
    ///
    /// # Errors
    ///
    /// Returns `SilenceError::InvalidSilence` if:
    /// - The matcher list is empty
    /// - `starts_at` is not before `ends_at`
    /// - `created_by` is empty
    /// - The comment exceeds the maximum length
    ///
    /// Returns `SilenceError::InvalidMatcher` if a matcher has an empty label
    /// name or a regex that does not compile.
    pub fn validate(&self) -> Result<()> {
        if self.matchers.is_empty() {
            return Err(SilenceError::invalid("matchers cannot be empty"));
        }

        if self.starts_at >= self.ends_at {
            return Err(SilenceError::invalid(
                "silence end time must be after start time",
            ));
        }

        if self.created_by.trim().is_empty() {
            return Err(SilenceError::invalid("created_by cannot be empty"));
        }

        if self.comment.len() > Self::MAX_COMMENT_LENGTH {
            return Err(SilenceError::invalid(format!(
                "comment exceeds maximum length of {} characters",
                Self::MAX_COMMENT_LENGTH
            )));
        }

        MatcherSet::compile(&self.matchers).map(|_| ())
    }

    /// Returns the status implied by the silence window at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> SilenceStatus {
        SilenceStatus::at(now, self.starts_at, self.ends_at)
    }

    /// Returns the status a reader should observe at `now`.
    ///
    /// A persisted `pending` follows the clock. A persisted `active` is kept
    /// even past `ends_at`: only the expiry worker moves it to `expired`.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> SilenceStatus {
        match self.status {
            SilenceStatus::Pending if self.starts_at <= now && now < self.ends_at => {
                SilenceStatus::Active
            }
            SilenceStatus::Pending if now >= self.ends_at => SilenceStatus::Expired,
            status => status,
        }
    }

    /// Returns true if the silence window contains `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }
}

/// The label set of an alert being checked against silences.
///
/// The subsystem never mutates an alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Label key/value pairs.
    pub labels: HashMap<String, String>,
}

impl Alert {
    /// Creates an alert with no labels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an alert from an existing label map.
    #[must_use]
    pub const fn from_labels(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }

    /// Adds a label to the alert.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a label, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Query shape for listing and counting silences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceFilter {
    /// Statuses to include; empty means all.
    #[serde(default)]
    pub statuses: Vec<SilenceStatus>,
    /// Only silences created by this user.
    #[serde(default)]
    pub created_by: Option<String>,
    /// Only silences whose window contains this instant.
    #[serde(default)]
    pub active_at: Option<DateTime<Utc>>,
    /// Only silences ending strictly after this instant.
    #[serde(default)]
    pub ends_after: Option<DateTime<Utc>>,
    /// Only silences ending at or before this instant.
    #[serde(default)]
    pub ends_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Number of results to skip.
    #[serde(default)]
    pub offset: usize,
}

impl SilenceFilter {
    /// Creates a filter matching every silence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter matching only active silences.
    #[must_use]
    pub fn active() -> Self {
        Self::new().status(SilenceStatus::Active)
    }

    /// Adds a status to the status set.
    #[must_use]
    pub fn status(mut self, status: SilenceStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    /// Restricts results to a creator.
    #[must_use]
    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Restricts results to silences whose window contains `at`.
    #[must_use]
    pub const fn active_at(mut self, at: DateTime<Utc>) -> Self {
        self.active_at = Some(at);
        self
    }

    /// Restricts results to silences ending after `at`.
    #[must_use]
    pub const fn ends_after(mut self, at: DateTime<Utc>) -> Self {
        self.ends_after = Some(at);
        self
    }

    /// Restricts results to silences ending at or before `at`.
    #[must_use]
    pub const fn ends_before(mut self, at: DateTime<Utc>) -> Self {
        self.ends_before = Some(at);
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of results to skip.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns true if the filter requests a page rather than the full result.
    #[must_use]
    pub const fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }

    /// Returns true if the filter is exactly "all active silences".
    #[must_use]
    pub fn is_active_only(&self) -> bool {
        self.statuses == [SilenceStatus::Active]
            && self.created_by.is_none()
            && self.active_at.is_none()
            && self.ends_after.is_none()
            && self.ends_before.is_none()
            && !self.is_paginated()
    }

    /// Checks the non-pagination predicates against a silence.
    #[must_use]
    pub fn matches(&self, silence: &Silence) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&silence.status) {
            return false;
        }
        if let Some(created_by) = &self.created_by {
            if &silence.created_by != created_by {
                return false;
            }
        }
        if let Some(at) = self.active_at {
            if !silence.is_active_at(at) {
                return false;
            }
        }
        if let Some(after) = self.ends_after {
            if silence.ends_at <= after {
                return false;
            }
        }
        if let Some(before) = self.ends_before {
            if silence.ends_at > before {
                return false;
            }
        }
        true
    }
}

/// The outcome of checking an alert against the active silences.
///
/// `error` is advisory: under the fail-open policy `silenced` and
/// `silence_ids` are valid even when it is set.
#[derive(Debug, Clone, Default)]
pub struct SilenceCheck {
    /// Whether at least one silence matched.
    pub silenced: bool,
    /// IDs of every matching silence.
    pub silence_ids: Vec<String>,
    /// A failure that degraded the check.
    pub error: Option<SilenceError>,
}

impl SilenceCheck {
    /// Builds a result from the collected silence IDs.
    #[must_use]
    pub fn from_matches(silence_ids: Vec<String>) -> Self {
        Self {
            silenced: !silence_ids.is_empty(),
            silence_ids,
            error: None,
        }
    }

    /// A fail-open result: not silenced, with the cause attached.
    #[must_use]
    pub fn fail_open(error: SilenceError) -> Self {
        Self {
            silenced: false,
            silence_ids: Vec::new(),
            error: Some(error),
        }
    }

    /// Attaches an advisory error.
    #[must_use]
    pub fn with_error(mut self, error: SilenceError) -> Self {
        self.error = Some(error);
        self
    }
}
