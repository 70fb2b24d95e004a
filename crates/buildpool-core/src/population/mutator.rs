//! Lineage-preserving mutation.
//!
//! The mutator turns an eligible parent into a draft child plus a
//! [`MutationDirective`]. The directive goes to an external rewriter; the
//! rewritten payload is then attached back onto the draft. Lineage fields are
//! set here and nowhere else.

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use buildpool_types::builder::{Builder, MutationType};
use buildpool_types::config::{MutationConfig, MutationWeights};

use super::manifest::{parse_declared_metadata, set_declared_name};
use super::rewriter::{
    ChildIdentity, MutationDirective, ParentPayload, RewrittenContent, guidance_for,
};
use super::weighted::WeightedTable;

/// Upper bound on builder name length.
pub const MAX_NAME_LEN: usize = 50;

/// Why a parent cannot spawn a child yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    /// The parent has not produced enough artifacts.
    TooFewSkills { produced: u32, threshold: u32 },
    /// The parent has no authority id to record as lineage.
    Unpublished,
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ineligibility::TooFewSkills {
                produced,
                threshold,
            } => write!(f, "produced {produced} skill(s), needs {threshold}"),
            Ineligibility::Unpublished => write!(f, "parent has not been published"),
        }
    }
}

/// A draft child waiting for rewritten content.
#[derive(Debug, Clone)]
pub struct MutationDraft {
    pub child: Builder,
    pub directive: MutationDirective,
}

/// Outcome of planning a mutation.
#[derive(Debug, Clone)]
pub enum MutationPlan {
    NotEligible(Ineligibility),
    Ready(Box<MutationDraft>),
}

/// Derives child drafts from eligible parents.
#[derive(Debug, Clone)]
pub struct Mutator {
    evolve_threshold: u32,
    table: WeightedTable<MutationType>,
}

impl Mutator {
    /// Create a mutator. A weight table summing to zero, or to more than
    /// `u32::MAX`, falls back to the default weights.
    pub fn new(config: &MutationConfig) -> Self {
        let table = WeightedTable::new(config.weights.entries()).unwrap_or_else(|| {
            tracing::warn!("Mutation weights sum to zero or overflow; using default weights");
            default_table()
        });

        Self {
            evolve_threshold: config.evolve_threshold,
            table,
        }
    }

    pub fn evolve_threshold(&self) -> u32 {
        self.evolve_threshold
    }

    /// Check whether `parent` may spawn a child.
    pub fn eligibility(&self, parent: &Builder) -> Result<(), Ineligibility> {
        if parent.skills_produced < self.evolve_threshold {
            return Err(Ineligibility::TooFewSkills {
                produced: parent.skills_produced,
                threshold: self.evolve_threshold,
            });
        }
        if parent.id.is_none() {
            return Err(Ineligibility::Unpublished);
        }
        Ok(())
    }

    /// Draw a mutation type from the weight table.
    pub fn pick_mutation_type<R: Rng + ?Sized>(&self, rng: &mut R) -> MutationType {
        self.table.sample(rng)
    }

    /// Plan a mutation of `parent`.
    ///
    /// Returns [`MutationPlan::NotEligible`] (not an error) when the parent
    /// does not meet the bar. Otherwise returns a draft child with fresh
    /// identity, lineage set, scores zeroed, supporting files deep-copied, and
    /// the directive for the rewriter.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        parent: &Builder,
        agent_runtime: Option<String>,
        rng: &mut R,
    ) -> MutationPlan {
        if let Err(reason) = self.eligibility(parent) {
            return MutationPlan::NotEligible(reason);
        }
        let Some(parent_id) = parent.id.clone() else {
            return MutationPlan::NotEligible(Ineligibility::Unpublished);
        };

        let mutation_type = self.pick_mutation_type(rng);
        let generation = parent.generation + 1;
        let name = child_name(&parent.name, generation);

        let child = Builder {
            id: None,
            local_id: Uuid::now_v7(),
            name: name.clone(),
            description: parent.description.clone(),
            fitness_score: 0.0,
            generation,
            parent_ids: vec![parent_id],
            mutation_type: Some(mutation_type),
            skills_produced: 0,
            instruction_text: parent.instruction_text.clone(),
            supporting_files: parent.supporting_files.clone(),
            agent_runtime: agent_runtime.or_else(|| parent.agent_runtime.clone()),
            created_at: Utc::now(),
            synced_at: None,
        };

        let directive = MutationDirective {
            mutation_type,
            guidance: guidance_for(mutation_type).to_owned(),
            parent: ParentPayload {
                id: parent.id.clone(),
                name: parent.name.clone(),
                description: parent.description.clone(),
                instruction_text: parent.instruction_text.clone(),
                supporting_files: parent.supporting_files.clone(),
            },
            child: ChildIdentity {
                local_id: child.local_id,
                name,
                generation,
                parent_ids: child.parent_ids.clone(),
            },
            idea: None,
            feedback: None,
        };

        tracing::debug!(
            parent = %parent.name,
            child = %child.name,
            mutation = %mutation_type,
            generation,
            "Planned mutation"
        );

        MutationPlan::Ready(Box::new(MutationDraft { child, directive }))
    }

    /// Attach rewritten content to a draft child.
    ///
    /// The frontmatter `name` is forced to the child's lineage name; if the
    /// frontmatter cannot be parsed the content is attached unchanged and left
    /// for the validator to reject. A declared description replaces the
    /// inherited one. Lineage fields are never touched.
    pub fn attach(&self, child: &mut Builder, content: RewrittenContent) {
        let RewrittenContent {
            instruction_text,
            supporting_files,
        } = content;

        child.instruction_text = match set_declared_name(&instruction_text, &child.name) {
            Ok(renamed) => renamed,
            Err(e) => {
                tracing::debug!(child = %child.name, error = %e, "Rewritten content has no usable frontmatter");
                instruction_text
            }
        };

        if let Ok(declared) = parse_declared_metadata(&child.instruction_text) {
            if let Some(description) = declared.description {
                child.description = description;
            }
        }

        if let Some(files) = supporting_files {
            child.supporting_files = files;
        }
    }
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new(&MutationConfig::default())
    }
}

fn default_table() -> WeightedTable<MutationType> {
    WeightedTable::new(MutationWeights::default().entries())
        .unwrap_or_else(|| unreachable!("default mutation weights are non-zero"))
}

/// Name for a child of `parent_name` at `generation`: `<parent>-v<generation>`.
///
/// When the result would exceed [`MAX_NAME_LEN`], the parent portion is
/// shortened so the version suffix survives, and any hyphen left dangling by
/// the cut is dropped.
pub fn child_name(parent_name: &str, generation: u32) -> String {
    let suffix = format!("-v{generation}");
    let budget = MAX_NAME_LEN.saturating_sub(suffix.len());

    let base: String = parent_name.chars().take(budget).collect();
    let base = base.trim_end_matches('-');

    format!("{base}{suffix}")
}
