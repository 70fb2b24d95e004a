//! Wire types exchanged with the authoritative pool.
//!
//! The sync exchange sends metadata-only summaries of local builders and
//! receives full records to add plus ids to cull. Publishing sends a freshly
//! minted child and receives its authority-assigned id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::builder::{Builder, FileMap, MutationType};

/// Metadata-only view of a published local builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderSummary {
    pub id: String,
    pub name: String,
    pub fitness_score: f64,
    pub generation: u32,
    pub skills_produced: u32,
}

/// Client → authority: what the replica currently holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    pub local_builders: Vec<BuilderSummary>,
}

/// Authority → client: builders to add (or overwrite) and ids to cull.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub add: Vec<BuilderRecord>,
    #[serde(default)]
    pub cull: Vec<String>,
}

/// A full builder record as served by the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skill_md: String,
    #[serde(default, deserialize_with = "deserialize_files_json")]
    pub files_json: FileMap,
    #[serde(default)]
    pub fitness_score: f64,
    #[serde(default)]
    pub generation: u32,
    #[serde(default, deserialize_with = "deserialize_mutation_type")]
    pub mutation_type: Option<MutationType>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub skills_produced: u32,
    #[serde(default)]
    pub agent_runtime: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl BuilderRecord {
    /// Convert into a local builder.
    ///
    /// `local_id` is kept from an existing local copy when there is one so the
    /// discriminator stays stable across overwrites. Negative or non-finite
    /// fitness values are clamped to zero.
    pub fn into_builder(self, local_id: Option<Uuid>, synced_at: DateTime<Utc>) -> Builder {
        let fitness_score = if self.fitness_score.is_finite() && self.fitness_score > 0.0 {
            self.fitness_score
        } else {
            0.0
        };

        Builder {
            id: Some(self.id),
            local_id: local_id.unwrap_or_else(Uuid::now_v7),
            name: self.name,
            description: self.description,
            fitness_score,
            generation: self.generation,
            parent_ids: self.parent_ids,
            mutation_type: self.mutation_type,
            skills_produced: self.skills_produced,
            instruction_text: self.skill_md,
            supporting_files: self.files_json,
            agent_runtime: self.agent_runtime,
            created_at: self.created_at.unwrap_or(synced_at),
            synced_at: Some(synced_at),
        }
    }
}

/// Client → authority: publish a newly minted child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub name: String,
    pub description: String,
    pub skill_md: String,
    pub files_json: FileMap,
    pub parent_ids: Vec<String>,
    pub mutation_type: Option<MutationType>,
    pub agent_runtime: Option<String>,
}

impl PublishRequest {
    pub fn from_builder(builder: &Builder) -> Self {
        Self {
            name: builder.name.clone(),
            description: builder.description.clone(),
            skill_md: builder.instruction_text.clone(),
            files_json: builder.supporting_files.clone(),
            parent_ids: builder.parent_ids.clone(),
            mutation_type: builder.mutation_type,
            agent_runtime: builder.agent_runtime.clone(),
        }
    }
}

/// Authority → client: the id assigned to a published builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub id: String,
}

/// Accept `files_json` either as an object or as a string holding one.
fn deserialize_files_json<'de, D>(deserializer: D) -> Result<FileMap, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFiles {
        Map(FileMap),
        Encoded(String),
    }

    match Option::<RawFiles>::deserialize(deserializer)? {
        None => Ok(FileMap::new()),
        Some(RawFiles::Map(map)) => Ok(map),
        Some(RawFiles::Encoded(text)) if text.trim().is_empty() => Ok(FileMap::new()),
        Some(RawFiles::Encoded(text)) => {
            serde_json::from_str(&text).map_err(serde::de::Error::custom)
        }
    }
}

/// Unknown mutation labels (e.g. "genesis") map to `None` instead of failing
/// the whole response.
fn deserialize_mutation_type<'de, D>(deserializer: D) -> Result<Option<MutationType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}
