//! Population store trait definition.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use buildpool_types::builder::{Builder, BuilderKey, GeneratedArtifact};
use buildpool_types::error::StoreError;

/// Durable storage for the local replica.
///
/// Each builder is stored as a unit keyed by [`Builder::key`]; saving replaces
/// the whole unit rather than patching fields. Implementations must leave the
/// previous copy intact if a save fails part way.
pub trait PopulationStore: Send + Sync {
    /// Load every readable builder, oldest first. Unreadable entries are
    /// skipped, not reported as errors.
    fn load_all(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Builder>, StoreError>> + Send;

    /// Write a builder, replacing any existing copy under the same key.
    fn save(
        &self,
        builder: &Builder,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove a builder. Returns `false` if nothing was stored under `key`.
    fn remove(
        &self,
        key: &BuilderKey,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Completion time of the last successful sync, if any.
    fn last_sync(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;

    /// Record a successful sync.
    fn record_sync(
        &self,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Persist a generated artifact and return where it was written.
    fn save_artifact(
        &self,
        artifact: &GeneratedArtifact,
    ) -> impl std::future::Future<Output = Result<PathBuf, StoreError>> + Send;
}
