//! Error types for the claw-silences crate.

use thiserror::Error;

/// Errors that can occur in the silencing subsystem.
#[derive(Debug, Clone, Error)]
pub enum SilenceError {
    /// The silence failed validation and was not persisted.
    #[error("invalid silence: {reason}")]
    InvalidSilence {
        /// The reason the silence is invalid.
        reason: String,
    },

    /// A matcher failed validation (empty label name, malformed regex).
    #[error("invalid matcher for label '{label}': {reason}")]
    InvalidMatcher {
        /// The label name of the offending matcher.
        label: String,
        /// The reason the matcher is invalid.
        reason: String,
    },

    /// Silence with the given ID was not found.
    #[error("silence not found: {id}")]
    SilenceNotFound {
        /// The silence ID that was not found.
        id: String,
    },

    /// A stored silence could not be evaluated against an alert.
    #[error("matcher evaluation failed for silence {id}: {reason}")]
    MatcherEvaluation {
        /// The silence ID whose matchers failed.
        id: String,
        /// The reason evaluation failed.
        reason: String,
    },

    /// The coordinator has not been started yet.
    #[error("silence coordinator is not started")]
    NotStarted,

    /// `start` was called on a coordinator that already left `NotStarted`.
    #[error("silence coordinator is already started")]
    AlreadyStarted,

    /// The coordinator is shutting down.
    #[error("silence coordinator is shutting down")]
    ShuttingDown,

    /// The coordinator has been stopped.
    #[error("silence coordinator is stopped")]
    Stopped,

    /// Background workers did not finish within the shutdown timeout.
    #[error("shutdown timed out after {timeout_secs}s")]
    ShutdownTimeout {
        /// The configured timeout in seconds.
        timeout_secs: u64,
    },

    /// The persistent store could not be reached.
    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        /// The reason the store is unavailable.
        reason: String,
    },

    /// The persistent store rejected the operation.
    #[error("store error: {reason}")]
    Store {
        /// The reason the store operation failed.
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SilenceError {
    /// Returns true for errors caused by invalid caller input.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidSilence { .. } | Self::InvalidMatcher { .. })
    }

    /// Returns true if the error reports an unknown silence.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::SilenceNotFound { .. })
    }

    /// Returns true if the operation was rejected because of the coordinator state.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::NotStarted | Self::AlreadyStarted | Self::ShuttingDown | Self::Stopped
        )
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidSilence {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(id: impl Into<String>) -> Self {
        Self::SilenceNotFound { id: id.into() }
    }
}

impl From<serde_json::Error> for SilenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for silence operations.
pub type Result<T> = std::result::Result<T, SilenceError>;
