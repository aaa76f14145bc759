//! Time-bounded alert silencing for Clawbernetes.
//!
//! `claw-silences` suppresses notifications for alerts whose labels match an
//! operator-defined silence during its time window. It keeps an in-memory
//! cache of active silences in front of a pluggable store and runs two
//! background workers that keep both in shape.
//!
//! # Features
//!
//! - **Matchers**: Equality, inequality, and anchored regex matchers over alert labels
//! - **Status Lifecycle**: Silences move from pending to active to expired by the clock
//! - **Active-Silence Cache**: Alert checks are served from memory, with a store fallback
//! - **Fail-Open Filtering**: A failed lookup never hides an alert
//! - **Background Maintenance**: Periodic expiry, retention purge, and cache resync
//! - **Graceful Shutdown**: Workers stop on cancellation within a bounded timeout
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use claw_silences::{
//!     Alert, Matcher, MemorySilenceStore, Silence, SilenceConfig, SilenceCoordinator,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> claw_silences::Result<()> {
//! let coordinator = SilenceCoordinator::new(
//!     Arc::new(MemorySilenceStore::new()),
//!     SilenceConfig::default(),
//! )?;
//! coordinator.start().await?;
//!
//! // Silence HighCPU in production for the next four hours
//! let silence = Silence::new(
//!     vec![
//!         Matcher::equal("alertname", "HighCPU"),
//!         Matcher::regex("env", "prod|production"),
//!     ],
//!     Utc::now(),
//!     Utc::now() + Duration::hours(4),
//!     "admin",
//!     "Maintenance window",
//! )?;
//! let silence = coordinator.create_silence(silence).await?;
//!
//! let alert = Alert::new().label("alertname", "HighCPU").label("env", "prod");
//! let check = coordinator
//!     .is_alert_silenced(&alert, &CancellationToken::new())
//!     .await;
//! assert!(check.silenced);
//! assert_eq!(check.silence_ids, vec![silence.id]);
//!
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Custom Stores
//!
//! Persistence is behind the [`SilenceStore`] trait. [`MemorySilenceStore`]
//! is provided for tests and single-process deployments; a database-backed
//! implementation plugs in the same way:
//!
//! ```rust,ignore
//! let store: Arc<dyn SilenceStore> = Arc::new(PostgresSilenceStore::connect(url).await?);
//! let coordinator = SilenceCoordinator::new(store, SilenceConfig::from_file("silences.json")?)?;
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/claw-silences/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod expiry;
pub mod matcher;
pub mod metrics;
pub mod store;
pub mod sync;
pub mod types;

// Re-export main types at crate root
pub use cache::{ActiveSilenceCache, CacheStats};
pub use config::SilenceConfig;
pub use coordinator::{LifecycleState, SilenceCoordinator};
pub use error::{Result, SilenceError};
pub use expiry::{ExpiryReport, ExpiryWorker};
pub use matcher::{CompiledMatcher, CompiledSilence, MatcherSet};
pub use metrics::{
    LATENCY_BUCKETS_US, MetricsSnapshot, OperationKind, OperationSnapshot, SilenceMetrics,
};
pub use store::{MemorySilenceStore, SilenceStore};
pub use sync::{SyncReport, SyncWorker};
pub use types::{Alert, Matcher, Silence, SilenceCheck, SilenceFilter, SilenceStatus};
