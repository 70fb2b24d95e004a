//! Filesystem adapters for buildpool.
//!
//! Directory layout helpers, payload (SKILL.md plus supporting files)
//! reading and writing, and the `PopulationStore` implementation.

pub mod population;

use std::path::{Path, PathBuf};

use anyhow::Context;

use buildpool_core::population::manifest::parse_declared_metadata;
use buildpool_core::population::validator::{validate_key, validate_path};
use buildpool_types::builder::{FileMap, GeneratedArtifact};
use buildpool_types::error::StoreError;

/// Instruction text file inside every builder and artifact directory.
pub const SKILL_FILE: &str = "SKILL.md";

/// Per-builder metadata file.
pub const META_FILE: &str = ".buildpool-meta.toml";

/// Paths under the data directory.
///
/// ```text
/// {data_dir}/
///   config.toml
///   credentials.toml
///   sync-state.toml
///   builders/{key}/SKILL.md
///   builders/{key}/.buildpool-meta.toml
///   artifacts/{name}/SKILL.md
/// ```
#[derive(Debug, Clone)]
pub struct PoolLayout {
    data_dir: PathBuf,
}

impl PoolLayout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn builders_dir(&self) -> PathBuf {
        self.data_dir.join("builders")
    }

    /// Directory for the builder stored under `key`. Keys that are not a
    /// plain directory name are refused.
    pub fn builder_dir(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key).map_err(|_| StoreError::InvalidKey(key.to_owned()))?;
        Ok(self.builders_dir().join(key))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync-state.toml")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.toml")
    }
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `BUILDPOOL_DATA_DIR` environment variable
/// 2. `~/.buildpool`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BUILDPOOL_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".buildpool");
    }

    // Last resort: current directory
    PathBuf::from(".buildpool")
}

/// Write SKILL.md and supporting files into `dir`, which must already exist.
pub(crate) async fn write_payload(
    dir: &Path,
    instruction_text: &str,
    files: &FileMap,
) -> anyhow::Result<()> {
    let skill_path = dir.join(SKILL_FILE);
    tokio::fs::write(&skill_path, instruction_text)
        .await
        .with_context(|| format!("Failed to write {}", skill_path.display()))?;

    for (relative, content) in files {
        validate_path(relative)?;
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(())
}

/// Read SKILL.md and every other non-hidden file below `dir`.
///
/// Supporting-file keys use `/` separators regardless of platform.
pub(crate) async fn read_payload(dir: &Path) -> anyhow::Result<(String, FileMap)> {
    let skill_path = dir.join(SKILL_FILE);
    let instruction_text = tokio::fs::read_to_string(&skill_path)
        .await
        .with_context(|| format!("Failed to read {}", skill_path.display()))?;

    let mut files = FileMap::new();
    let mut pending = vec![(dir.to_path_buf(), String::new())];

    while let Some((current, prefix)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("Failed to read directory {}", current.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                anyhow::bail!("Non UTF-8 file name in {}", current.display());
            };
            if name.starts_with('.') || (prefix.is_empty() && name == SKILL_FILE) {
                continue;
            }

            let relative = if prefix.is_empty() {
                name.to_owned()
            } else {
                format!("{prefix}/{name}")
            };

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), relative));
            } else if file_type.is_file() {
                let content = tokio::fs::read_to_string(entry.path())
                    .await
                    .with_context(|| format!("Failed to read {}", entry.path().display()))?;
                files.insert(relative, content);
            }
        }
    }

    Ok((instruction_text, files))
}

/// Load a generated artifact (or a seed builder) from a directory on disk.
///
/// The name and description come from the SKILL.md frontmatter, falling
/// back to the directory name and an empty description so that validation
/// reports the missing metadata rather than this loader.
pub async fn read_artifact_dir(dir: &Path) -> anyhow::Result<GeneratedArtifact> {
    let (instruction_text, supporting_files) = read_payload(dir).await?;
    let declared = parse_declared_metadata(&instruction_text).unwrap_or_default();

    let fallback_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact")
        .to_owned();

    Ok(GeneratedArtifact {
        name: declared.name.unwrap_or(fallback_name),
        description: declared.description.unwrap_or_default(),
        instruction_text,
        supporting_files,
    })
}
