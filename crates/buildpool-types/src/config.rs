//! Configuration types for buildpool.
//!
//! `PoolConfig` represents the top-level `config.toml` that tunes selection,
//! mutation, validation, and sync. Every field has a default so an empty or
//! partial file is valid.

use serde::{Deserialize, Serialize};

use crate::builder::MutationType;

/// Top-level configuration, loaded from `~/.buildpool/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Base URL of the authoritative pool.
    #[serde(default = "default_authority_url")]
    pub authority_url: String,

    /// Runtime label attached to builders minted by this replica.
    #[serde(default)]
    pub agent_runtime: Option<String>,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub mutation: MutationConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub rewriter: RewriterConfig,
}

fn default_authority_url() -> String {
    "http://127.0.0.1:8787".to_owned()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            authority_url: default_authority_url(),
            agent_runtime: None,
            selection: SelectionConfig::default(),
            mutation: MutationConfig::default(),
            validation: ValidationConfig::default(),
            sync: SyncConfig::default(),
            rewriter: RewriterConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Epsilon-greedy split and the zero-fitness threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Probability of taking the exploitation branch (default: 0.8).
    #[serde(default = "default_exploit_ratio")]
    pub exploit_ratio: f64,
    /// Total fitness below this counts as zero (default: 1e-4).
    #[serde(default = "default_zero_fitness_epsilon")]
    pub zero_fitness_epsilon: f64,
}

fn default_exploit_ratio() -> f64 {
    0.8
}

fn default_zero_fitness_epsilon() -> f64 {
    1e-4
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            exploit_ratio: default_exploit_ratio(),
            zero_fitness_epsilon: default_zero_fitness_epsilon(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Minimum `skills_produced` before a builder may spawn a child (default: 3).
    #[serde(default = "default_evolve_threshold")]
    pub evolve_threshold: u32,
    #[serde(default)]
    pub weights: MutationWeights,
}

fn default_evolve_threshold() -> u32 {
    3
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            evolve_threshold: default_evolve_threshold(),
            weights: MutationWeights::default(),
        }
    }
}

/// Relative weights for each mutation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationWeights {
    #[serde(default = "default_prompt_tweak")]
    pub prompt_tweak: u32,
    #[serde(default = "default_structure_change")]
    pub structure_change: u32,
    #[serde(default = "default_reference_swap")]
    pub reference_swap: u32,
    #[serde(default = "default_hybrid")]
    pub hybrid: u32,
}

fn default_prompt_tweak() -> u32 {
    40
}

fn default_structure_change() -> u32 {
    25
}

fn default_reference_swap() -> u32 {
    20
}

fn default_hybrid() -> u32 {
    15
}

impl MutationWeights {
    /// The weights as `(type, weight)` pairs in table order.
    pub fn entries(&self) -> Vec<(MutationType, u32)> {
        vec![
            (MutationType::PromptTweak, self.prompt_tweak),
            (MutationType::StructureChange, self.structure_change),
            (MutationType::ReferenceSwap, self.reference_swap),
            (MutationType::Hybrid, self.hybrid),
        ]
    }
}

impl Default for MutationWeights {
    fn default() -> Self {
        Self {
            prompt_tweak: default_prompt_tweak(),
            structure_change: default_structure_change(),
            reference_swap: default_reference_swap(),
            hybrid: default_hybrid(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum size of any supporting file in bytes (default: 100 KiB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Minimum instruction text length for mutated drafts (default: 200).
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
    /// Minimum fraction of lines a mutation must change (default: 0.10).
    #[serde(default = "default_min_mutation_delta")]
    pub min_mutation_delta: f64,
    /// Corrective rewrites attempted after a rejection (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_file_bytes() -> usize {
    100 * 1024
}

fn default_min_content_chars() -> usize {
    200
}

fn default_min_mutation_delta() -> f64 {
    0.10
}

fn default_max_retries() -> u32 {
    2
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            min_content_chars: default_min_content_chars(),
            min_mutation_delta: default_min_mutation_delta(),
            max_retries: default_max_retries(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Total attempts per sync, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per retry (default: 500 ms).
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Age after which the replica needs a sync (default: 300 s).
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    /// Per-request timeout (default: 30 s).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_freshness_window_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            freshness_window_secs: default_freshness_window_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rewriter
// ---------------------------------------------------------------------------

/// External command that performs the content rewrite for a mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriterConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before the rewriter process is abandoned (default: 120).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}
