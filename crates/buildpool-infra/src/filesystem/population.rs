//! Filesystem-based population store.
//!
//! Each builder occupies `{data_dir}/builders/{key}/` holding `SKILL.md`,
//! `.buildpool-meta.toml`, and its supporting files. A save builds the full
//! directory in a hidden temp sibling and swaps it into place, so a reader
//! never sees a half-written builder.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use buildpool_core::population::validator::validate_name;
use buildpool_core::repository::population::PopulationStore;
use buildpool_core::service::hash::ContentHasher;
use buildpool_types::builder::{Builder, BuilderKey, BuilderMeta, FileMap, GeneratedArtifact};
use buildpool_types::error::StoreError;

use super::{META_FILE, PoolLayout, read_payload, write_payload};
use crate::crypto::hash::Sha256ContentHasher;

/// Contents of `sync-state.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncState {
    #[serde(default)]
    last_sync: Option<DateTime<Utc>>,
}

/// Population store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FsPopulationStore<H: ContentHasher = Sha256ContentHasher> {
    layout: PoolLayout,
    hasher: H,
}

impl FsPopulationStore<Sha256ContentHasher> {
    pub fn new(data_dir: PathBuf) -> Self {
        Self::with_hasher(data_dir, Sha256ContentHasher::new())
    }
}

impl<H: ContentHasher> FsPopulationStore<H> {
    pub fn with_hasher(data_dir: PathBuf, hasher: H) -> Self {
        Self {
            layout: PoolLayout::new(data_dir),
            hasher,
        }
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    /// Checksum over the instruction text and every supporting file.
    pub fn payload_checksum(&self, instruction_text: &str, files: &FileMap) -> String {
        let mut content = String::with_capacity(instruction_text.len());
        content.push_str(instruction_text);
        for (path, body) in files {
            content.push('\0');
            content.push_str(path);
            content.push('\0');
            content.push_str(body);
        }
        self.hasher.compute_hash(&content)
    }

    async fn read_meta(dir: &Path) -> anyhow::Result<BuilderMeta> {
        let meta_path = dir.join(META_FILE);
        let raw = tokio::fs::read_to_string(&meta_path)
            .await
            .with_context(|| format!("Failed to read {}", meta_path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", meta_path.display()))
    }

    async fn write_meta(dir: &Path, meta: &BuilderMeta) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(meta).context("Failed to serialize builder metadata")?;
        write_atomic(&dir.join(META_FILE), &content).await
    }

    /// Load one builder directory, checking that its metadata matches the
    /// directory it lives in.
    async fn load_builder(&self, dir: &Path, dir_name: &str) -> anyhow::Result<Builder> {
        let meta = Self::read_meta(dir).await?;
        let (instruction_text, files) = read_payload(dir).await?;

        let builder = meta.into_builder(instruction_text, files);
        let key = builder.key().to_string();
        if key != dir_name {
            anyhow::bail!("metadata key '{key}' does not match directory '{dir_name}'");
        }
        Ok(builder)
    }

    async fn save_inner(&self, builder: &Builder) -> anyhow::Result<()> {
        let key = builder.key().to_string();
        let target = self.layout.builder_dir(&key)?;
        let checksum = self.payload_checksum(&builder.instruction_text, &builder.supporting_files);
        let meta = BuilderMeta::from_builder(builder, checksum.clone());

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            if let Ok(existing) = Self::read_meta(&target).await {
                if existing.checksum == checksum {
                    tracing::trace!(builder = %builder.name, "Payload unchanged; rewriting metadata only");
                    return Self::write_meta(&target, &meta).await;
                }
            }
        }

        let builders_dir = self.layout.builders_dir();
        tokio::fs::create_dir_all(&builders_dir)
            .await
            .with_context(|| format!("Failed to create {}", builders_dir.display()))?;

        let staging = builders_dir.join(format!(".{key}.tmp-{}", Uuid::now_v7()));
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let staged = async {
            write_payload(&staging, &builder.instruction_text, &builder.supporting_files).await?;
            Self::write_meta(&staging, &meta).await
        }
        .await;
        if let Err(e) = staged {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        swap_into_place(&staging, &target).await
    }
}

/// Replace `target` with `staging`. The old directory is moved aside first
/// and deleted only once the new one is in place.
async fn swap_into_place(staging: &Path, target: &Path) -> anyhow::Result<()> {
    let retired = target.with_file_name(format!(
        ".{}.old-{}",
        target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("builder"),
        Uuid::now_v7()
    ));

    let had_previous = tokio::fs::try_exists(target).await.unwrap_or(false);
    if had_previous {
        tokio::fs::rename(target, &retired)
            .await
            .with_context(|| format!("Failed to move aside {}", target.display()))?;
    }

    if let Err(e) = tokio::fs::rename(staging, target).await {
        if had_previous {
            let _ = tokio::fs::rename(&retired, target).await;
        }
        let _ = tokio::fs::remove_dir_all(staging).await;
        return Err(e).with_context(|| format!("Failed to move {} into place", target.display()));
    }

    if had_previous {
        if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
            tracing::warn!(path = %retired.display(), error = %e, "Failed to remove retired builder directory");
        }
    }
    Ok(())
}

/// Write a file via a temp sibling and rename.
async fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::now_v7()));
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))
}

fn io_error(e: anyhow::Error) -> StoreError {
    StoreError::Io(format!("{e:#}"))
}

impl<H: ContentHasher> PopulationStore for FsPopulationStore<H> {
    async fn load_all(&self) -> Result<Vec<Builder>, StoreError> {
        let builders_dir = self.layout.builders_dir();
        if !tokio::fs::try_exists(&builders_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&builders_dir)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {e}", builders_dir.display())))?;

        let mut builders = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };
            // Staging and retired directories are hidden.
            if name.starts_with('.') || !path.is_dir() {
                continue;
            }

            match self.load_builder(&path, &name).await {
                Ok(builder) => builders.push(builder),
                Err(e) => {
                    tracing::warn!(builder = %name, error = %format!("{e:#}"), "Skipping corrupted builder");
                }
            }
        }

        builders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        Ok(builders)
    }

    async fn save(&self, builder: &Builder) -> Result<(), StoreError> {
        self.layout.builder_dir(&builder.key().to_string())?;
        self.save_inner(builder).await.map_err(io_error)?;
        tracing::debug!(builder = %builder.name, key = %builder.key(), "Saved builder");
        Ok(())
    }

    async fn remove(&self, key: &BuilderKey) -> Result<bool, StoreError> {
        let dir = self.layout.builder_dir(&key.to_string())?;
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to remove {}: {e}", dir.display())))?;
        tracing::debug!(key = %key, "Removed builder");
        Ok(true)
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.layout.sync_state_path();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", path.display()))),
        };

        match toml::from_str::<SyncState>(&raw) {
            Ok(state) => Ok(state.last_sync),
            Err(e) => {
                // An unreadable marker only means the next run syncs again.
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed sync state");
                Ok(None)
            }
        }
    }

    async fn record_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let state = SyncState { last_sync: Some(at) };
        let content = toml::to_string_pretty(&state)
            .map_err(|e| StoreError::Io(format!("Failed to serialize sync state: {e}")))?;
        write_atomic(&self.layout.sync_state_path(), &content)
            .await
            .map_err(io_error)
    }

    async fn save_artifact(&self, artifact: &GeneratedArtifact) -> Result<PathBuf, StoreError> {
        validate_name(&artifact.name).map_err(|e| StoreError::Io(e.to_string()))?;

        let artifacts_dir = self.layout.artifacts_dir();
        let target = artifacts_dir.join(&artifact.name);
        let staging = artifacts_dir.join(format!(".{}.tmp-{}", artifact.name, Uuid::now_v7()));

        let result = async {
            tokio::fs::create_dir_all(&staging)
                .await
                .with_context(|| format!("Failed to create {}", staging.display()))?;
            write_payload(&staging, &artifact.instruction_text, &artifact.supporting_files).await?;
            swap_into_place(&staging, &target).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(io_error(e));
        }
        Ok(target)
    }
}
