//! Content rewriting port.
//!
//! Rewriting instruction text is open-ended content generation, so the
//! mutator never does it itself. It emits a [`MutationDirective`] and an
//! injected [`ContentRewriter`] returns the new payload.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use buildpool_types::builder::{FileMap, MutationType};

/// The parent payload a directive asks to rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentPayload {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub instruction_text: String,
    pub supporting_files: FileMap,
}

/// Identity the rewritten child will carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildIdentity {
    pub local_id: Uuid,
    pub name: String,
    pub generation: u32,
    pub parent_ids: Vec<String>,
}

/// Structured request handed to the rewriting capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationDirective {
    pub mutation_type: MutationType,
    /// Plain-language description of the change `mutation_type` asks for.
    pub guidance: String,
    pub parent: ParentPayload,
    pub child: ChildIdentity,
    /// Opaque idea from the idea source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea: Option<String>,
    /// Why the previous rewrite was rejected, for a corrective attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Payload returned by the rewriter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrittenContent {
    /// Full SKILL.md (frontmatter plus body).
    #[serde(alias = "skill_md")]
    pub instruction_text: String,
    /// Replacement supporting files; `None` keeps the parent's copy.
    #[serde(default, alias = "files", alias = "files_json")]
    pub supporting_files: Option<FileMap>,
}

/// Capability that genuinely transforms instruction text.
///
/// Uses RPITIT for the async method, consistent with all async traits in
/// this crate.
pub trait ContentRewriter: Send + Sync {
    fn rewrite(
        &self,
        directive: &MutationDirective,
    ) -> impl Future<Output = anyhow::Result<RewrittenContent>> + Send;
}

/// Guidance text for each mutation type.
pub fn guidance_for(mutation_type: MutationType) -> &'static str {
    match mutation_type {
        MutationType::PromptTweak => {
            "Reword and sharpen the instructions. Keep the section layout, but \
             change phrasing, emphasis, and examples where they can be clearer."
        }
        MutationType::StructureChange => {
            "Reorganize the instructions: reorder, split, or merge sections and \
             steps so the workflow reads differently while keeping its intent."
        }
        MutationType::ReferenceSwap => {
            "Replace or extend the reference material. Update supporting files \
             and the passages that cite them."
        }
        MutationType::Hybrid => {
            "Combine several kinds of change: rephrase, restructure, and refresh \
             reference material together."
        }
    }
}
