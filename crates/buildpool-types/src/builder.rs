//! Builder domain types.
//!
//! A builder is a versioned SKILL.md instruction artifact that is selected,
//! mutated, scored, and reconciled against the authoritative pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::sync::BuilderSummary;

/// Supporting files keyed by relative path.
///
/// A `BTreeMap` keeps the on-disk and wire ordering stable.
pub type FileMap = BTreeMap<String, String>;

/// Prefix used for the directory key of builders not yet published.
pub const LOCAL_KEY_PREFIX: &str = "local-";

// ---------------------------------------------------------------------------
// MutationType
// ---------------------------------------------------------------------------

/// The kind of change a mutation asks the rewriter to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    /// Reword or sharpen the instructions without changing their shape.
    PromptTweak,
    /// Reorganize sections, steps, or the overall flow.
    StructureChange,
    /// Replace or add reference material in the supporting files.
    ReferenceSwap,
    /// Combine two or more of the above.
    Hybrid,
}

impl MutationType {
    /// All mutation types in weight-table order.
    pub const ALL: [MutationType; 4] = [
        MutationType::PromptTweak,
        MutationType::StructureChange,
        MutationType::ReferenceSwap,
        MutationType::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationType::PromptTweak => "prompt_tweak",
            MutationType::StructureChange => "structure_change",
            MutationType::ReferenceSwap => "reference_swap",
            MutationType::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "prompt_tweak" => Ok(MutationType::PromptTweak),
            "structure_change" => Ok(MutationType::StructureChange),
            "reference_swap" => Ok(MutationType::ReferenceSwap),
            "hybrid" => Ok(MutationType::Hybrid),
            other => Err(format!("invalid mutation type: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// BuilderKey
// ---------------------------------------------------------------------------

/// How the local replica indexes a builder.
///
/// Published builders are keyed by their authority-assigned id; drafts that
/// have not been published yet are keyed by a local UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuilderKey {
    Published(String),
    Local(Uuid),
}

impl fmt::Display for BuilderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderKey::Published(id) => f.write_str(id),
            BuilderKey::Local(uuid) => write!(f, "{LOCAL_KEY_PREFIX}{uuid}"),
        }
    }
}

impl FromStr for BuilderKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("builder key must not be empty".to_owned());
        }
        if let Some(rest) = s.strip_prefix(LOCAL_KEY_PREFIX) {
            if let Ok(uuid) = Uuid::parse_str(rest) {
                return Ok(BuilderKey::Local(uuid));
            }
        }
        Ok(BuilderKey::Published(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// A builder in the population.
///
/// `instruction_text` is the full SKILL.md (frontmatter plus body) and is
/// treated as opaque payload outside of validation. Once published, only
/// `fitness_score`, `skills_produced`, and `synced_at` change locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Builder {
    /// Authority-assigned id; `None` until published.
    pub id: Option<String>,
    /// Local discriminator used to index unpublished drafts.
    pub local_id: Uuid,
    /// Kebab-case name, unique within the pool.
    pub name: String,
    pub description: String,
    pub fitness_score: f64,
    /// 0 for genesis builders.
    pub generation: u32,
    /// Empty iff `generation == 0`.
    pub parent_ids: Vec<String>,
    /// `None` for genesis builders.
    pub mutation_type: Option<MutationType>,
    /// Number of downstream artifacts attributed to this builder.
    pub skills_produced: u32,
    pub instruction_text: String,
    pub supporting_files: FileMap,
    /// Which external execution environment produced this builder.
    pub agent_runtime: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Builder {
    /// Create a genesis builder (generation 0, no parents, not yet published).
    pub fn genesis(
        name: impl Into<String>,
        description: impl Into<String>,
        instruction_text: impl Into<String>,
        supporting_files: FileMap,
    ) -> Self {
        Self {
            id: None,
            local_id: Uuid::now_v7(),
            name: name.into(),
            description: description.into(),
            fitness_score: 0.0,
            generation: 0,
            parent_ids: Vec::new(),
            mutation_type: None,
            skills_produced: 0,
            instruction_text: instruction_text.into(),
            supporting_files,
            agent_runtime: None,
            created_at: Utc::now(),
            synced_at: None,
        }
    }

    /// The key this builder is indexed under in the local replica.
    pub fn key(&self) -> BuilderKey {
        match &self.id {
            Some(id) => BuilderKey::Published(id.clone()),
            None => BuilderKey::Local(self.local_id),
        }
    }

    pub fn is_published(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_genesis(&self) -> bool {
        self.generation == 0
    }

    /// The metadata-only summary sent during sync.
    ///
    /// Returns `None` for unpublished drafts, which the authority cannot know.
    pub fn summary(&self) -> Option<BuilderSummary> {
        let id = self.id.clone()?;
        Some(BuilderSummary {
            id,
            name: self.name.clone(),
            fitness_score: self.fitness_score,
            generation: self.generation,
            skills_produced: self.skills_produced,
        })
    }
}

// ---------------------------------------------------------------------------
// Generated artifacts
// ---------------------------------------------------------------------------

/// The output a builder produces when followed.
///
/// Same shape as a builder payload but without a score of its own; recording
/// one credits the originating builder's `skills_produced`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub name: String,
    pub description: String,
    pub instruction_text: String,
    pub supporting_files: FileMap,
}

/// Read access to the payload shared by builders and generated artifacts.
pub trait Artifact {
    fn instruction_text(&self) -> &str;
    fn supporting_files(&self) -> &FileMap;
}

impl Artifact for Builder {
    fn instruction_text(&self) -> &str {
        &self.instruction_text
    }

    fn supporting_files(&self) -> &FileMap {
        &self.supporting_files
    }
}

impl Artifact for GeneratedArtifact {
    fn instruction_text(&self) -> &str {
        &self.instruction_text
    }

    fn supporting_files(&self) -> &FileMap {
        &self.supporting_files
    }
}

// ---------------------------------------------------------------------------
// On-disk metadata
// ---------------------------------------------------------------------------

/// Metadata stored in `.buildpool-meta.toml` alongside a builder's SKILL.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderMeta {
    #[serde(default)]
    pub id: Option<String>,
    pub local_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fitness_score: f64,
    #[serde(default)]
    pub generation: u32,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub mutation_type: Option<MutationType>,
    #[serde(default)]
    pub skills_produced: u32,
    #[serde(default)]
    pub agent_runtime: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Hex-encoded hash of the payload (instruction text and supporting files).
    #[serde(default)]
    pub checksum: String,
}

impl BuilderMeta {
    pub fn from_builder(builder: &Builder, checksum: String) -> Self {
        Self {
            id: builder.id.clone(),
            local_id: builder.local_id,
            name: builder.name.clone(),
            description: builder.description.clone(),
            fitness_score: builder.fitness_score,
            generation: builder.generation,
            parent_ids: builder.parent_ids.clone(),
            mutation_type: builder.mutation_type,
            skills_produced: builder.skills_produced,
            agent_runtime: builder.agent_runtime.clone(),
            created_at: builder.created_at,
            synced_at: builder.synced_at,
            checksum,
        }
    }

    /// Rebuild the full builder from metadata plus the on-disk payload.
    pub fn into_builder(self, instruction_text: String, supporting_files: FileMap) -> Builder {
        Builder {
            id: self.id,
            local_id: self.local_id,
            name: self.name,
            description: self.description,
            fitness_score: self.fitness_score,
            generation: self.generation,
            parent_ids: self.parent_ids,
            mutation_type: self.mutation_type,
            skills_produced: self.skills_produced,
            instruction_text,
            supporting_files,
            agent_runtime: self.agent_runtime,
            created_at: self.created_at,
            synced_at: self.synced_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_type_display_and_parse() {
        for mt in MutationType::ALL {
            assert_eq!(mt.to_string().parse::<MutationType>().unwrap(), mt);
        }
        assert_eq!(
            "Structure-Change".parse::<MutationType>().unwrap(),
            MutationType::StructureChange
        );
        assert!("genesis".parse::<MutationType>().is_err());
    }

    #[test]
    fn test_mutation_type_serializes_snake_case() {
        let json = serde_json::to_string(&MutationType::ReferenceSwap).unwrap();
        assert_eq!(json, "\"reference_swap\"");
    }

    #[test]
    fn test_key_prefers_published_id() {
        let mut builder = Builder::genesis("seed-builder", "A seed", "body", FileMap::new());
        assert!(matches!(builder.key(), BuilderKey::Local(_)));
        assert!(builder.key().to_string().starts_with(LOCAL_KEY_PREFIX));

        builder.id = Some("abc123".to_owned());
        assert_eq!(builder.key(), BuilderKey::Published("abc123".to_owned()));
    }

    #[test]
    fn test_key_round_trips_through_string() {
        let local = BuilderKey::Local(Uuid::now_v7());
        assert_eq!(local.to_string().parse::<BuilderKey>().unwrap(), local);

        let published = BuilderKey::Published("b-42".to_owned());
        assert_eq!(published.to_string().parse::<BuilderKey>().unwrap(), published);

        // A "local-" prefix without a UUID is treated as an authority id.
        assert_eq!(
            "local-hero".parse::<BuilderKey>().unwrap(),
            BuilderKey::Published("local-hero".to_owned())
        );
        assert!("".parse::<BuilderKey>().is_err());
    }

    #[test]
    fn test_summary_only_for_published() {
        let mut builder = Builder::genesis("seed-builder", "A seed", "body", FileMap::new());
        assert!(builder.summary().is_none());

        builder.id = Some("x".to_owned());
        builder.fitness_score = 2.5;
        builder.skills_produced = 4;
        let summary = builder.summary().unwrap();
        assert_eq!(summary.id, "x");
        assert_eq!(summary.name, "seed-builder");
        assert_eq!(summary.skills_produced, 4);
        assert!((summary.fitness_score - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_meta_toml_round_trip() {
        let mut builder = Builder::genesis("seed-builder", "A seed", "body", FileMap::new());
        builder.id = Some("x".to_owned());
        builder.generation = 2;
        builder.parent_ids = vec!["p".to_owned()];
        builder.mutation_type = Some(MutationType::Hybrid);

        let meta = BuilderMeta::from_builder(&builder, "deadbeef".to_owned());
        let text = toml::to_string_pretty(&meta).unwrap();
        let parsed: BuilderMeta = toml::from_str(&text).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("x"));
        assert_eq!(parsed.mutation_type, Some(MutationType::Hybrid));
        assert_eq!(parsed.checksum, "deadbeef");

        let restored = parsed.into_builder("body".to_owned(), FileMap::new());
        assert_eq!(restored.generation, 2);
        assert_eq!(restored.parent_ids, vec!["p".to_owned()]);
    }
}
