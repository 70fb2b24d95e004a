//! External-process content rewriter.
//!
//! Implements [`ContentRewriter`] by spawning the configured command,
//! writing the [`MutationDirective`] as JSON to its stdin, and reading the
//! rewritten payload from stdout. The process may answer with a JSON
//! object (`{"skill_md": ..., "files": {...}}`) or with a bare SKILL.md,
//! in which case the parent's supporting files are kept.

use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::AsyncWriteExt;

use buildpool_core::population::rewriter::{ContentRewriter, MutationDirective, RewrittenContent};
use buildpool_types::config::RewriterConfig;

/// Default timeout for one rewrite (two minutes).
const DEFAULT_REWRITE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct CommandRewriter {
    command: Option<String>,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRewriter {
    pub fn new(config: &RewriterConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_REWRITE_TIMEOUT_SECS),
            ),
        }
    }

    /// Whether a command is configured at all.
    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }
}

impl ContentRewriter for CommandRewriter {
    async fn rewrite(&self, directive: &MutationDirective) -> anyhow::Result<RewrittenContent> {
        let Some(command) = &self.command else {
            bail!("no rewriter command configured (set [rewriter] command in config.toml)");
        };

        let input = serde_json::to_vec(directive).context("Failed to encode mutation directive")?;

        tracing::debug!(
            command = %command,
            mutation_type = %directive.mutation_type,
            child = %directive.child.name,
            "Spawning rewriter"
        );

        let mut child = tokio::process::Command::new(command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn rewriter '{command}'"))?;

        // Stdin is fed while stdout is drained, so a rewriter that streams
        // its answer before reading all input cannot fill both pipes.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A rewriter that ignores stdin may close the pipe early.
                if let Err(e) = stdin.write_all(&input).await {
                    tracing::debug!(error = %e, "Rewriter closed stdin early");
                }
            }
        };
        let run = async {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| {
                format!(
                    "Rewriter '{command}' timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .context("Failed to wait for rewriter process")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Rewriter '{command}' exited with status {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Rewriter output is not valid UTF-8")?;
        parse_output(&stdout)
    }
}

fn parse_output(stdout: &str) -> anyhow::Result<RewrittenContent> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        bail!("Rewriter produced no output");
    }

    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).context("Rewriter returned malformed JSON");
    }

    Ok(RewrittenContent {
        instruction_text: stdout.to_owned(),
        supporting_files: None,
    })
}
