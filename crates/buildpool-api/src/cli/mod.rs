//! CLI command definitions for the `bpool` binary.
//!
//! Uses clap derive macros for argument parsing. Builders are referenced by
//! key (`<id>` or `local-<uuid>`), authority id, or name.

pub mod artifact;
pub mod display;
pub mod evolve;
pub mod pool;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Maintain a local replica of an evolving builder population.
#[derive(Parser)]
#[command(name = "bpool", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile the local replica with the authority.
    Sync {
        /// Sync even if the last sync is still fresh.
        #[arg(long)]
        force: bool,
    },

    /// List builders in the local replica.
    #[command(alias = "ls")]
    List {
        /// Only show unpublished drafts.
        #[arg(long)]
        drafts: bool,
    },

    /// Show details of a builder.
    Show {
        /// Builder key, id, or name.
        builder: String,
    },

    /// Pick a builder with the epsilon-greedy policy.
    Select,

    /// Mutate a builder into a new child draft.
    Evolve {
        /// Parent builder (key, id, or name). Selected automatically if omitted.
        builder: Option<String>,

        /// Idea passed through to the rewriter.
        #[arg(long)]
        idea: Option<String>,

        /// Publish the child to the authority once it validates.
        #[arg(long)]
        publish: bool,
    },

    /// Run control-loop iterations: sync, select, evolve, optionally publish.
    Run {
        /// Number of iterations.
        #[arg(short = 'n', long, default_value = "1")]
        iterations: u32,

        /// Idea passed through to the rewriter on every iteration.
        #[arg(long)]
        idea: Option<String>,

        /// Publish each validated child.
        #[arg(long)]
        publish: bool,
    },

    /// Publish a local draft to the authority.
    Publish {
        /// Draft key (`local-<uuid>`) or name.
        builder: String,
    },

    /// Validate a generated artifact directory without storing it.
    Validate {
        /// Directory containing SKILL.md and supporting files.
        dir: PathBuf,

        /// Also check it as a mutation of this parent builder.
        #[arg(long)]
        parent: Option<String>,
    },

    /// Record an artifact produced by a builder and credit the builder.
    Record {
        /// Builder that produced the artifact.
        builder: String,

        /// Directory containing the artifact's SKILL.md.
        dir: PathBuf,
    },

    /// Import a directory as a new genesis builder.
    Seed {
        /// Directory containing SKILL.md and supporting files.
        dir: PathBuf,
    },

    /// Population status dashboard.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
