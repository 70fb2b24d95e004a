//! Artifact commands: validate, record, seed.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use buildpool_infra::filesystem::read_artifact_dir;
use buildpool_types::builder::{Builder, GeneratedArtifact};
use buildpool_types::error::PoolError;

use super::display::{print_json, success};
use crate::state::AppState;

async fn load(dir: &Path) -> Result<GeneratedArtifact> {
    read_artifact_dir(dir)
        .await
        .with_context(|| format!("Failed to read artifact from {}", dir.display()))
}

/// Validate an artifact directory, optionally as a mutation of `parent`.
///
/// Exits non-zero when the artifact is rejected.
pub async fn validate(
    state: &AppState,
    dir: &Path,
    parent: Option<&str>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let artifact = load(dir).await?;
    let validator = state.service.validator();

    let result = match parent {
        None => validator.validate(&artifact),
        Some(reference) => {
            let parent = state
                .service
                .population()
                .resolve(reference)
                .ok_or_else(|| PoolError::NotFound(reference.to_owned()))?;
            let candidate = Builder::genesis(
                artifact.name.clone(),
                artifact.description.clone(),
                artifact.instruction_text.clone(),
                artifact.supporting_files.clone(),
            );
            validator.validate_mutation(&candidate, parent)
        }
    };

    if json {
        let value = match &result {
            Ok(_) => serde_json::json!({ "valid": true, "name": artifact.name }),
            Err(rejection) => serde_json::json!({
                "valid": false,
                "name": artifact.name,
                "reason": rejection.to_string(),
            }),
        };
        print_json(&value)?;
    }

    match result {
        Ok(_) => {
            if !json && !quiet {
                success(format!("{} is valid", style(&artifact.name).cyan().bold()));
                println!();
            }
            Ok(())
        }
        Err(rejection) => Err(PoolError::InvalidArtifact(rejection).into()),
    }
}

/// Record an artifact produced by `builder` and credit the builder.
pub async fn record(
    state: &mut AppState,
    reference: &str,
    dir: &Path,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let key = state
        .service
        .population()
        .resolve(reference)
        .map(Builder::key)
        .ok_or_else(|| PoolError::NotFound(reference.to_owned()))?;
    let artifact = load(dir).await?;

    let report = state.service.record_artifact(&key, artifact).await?;

    if json {
        return print_json(&report);
    }
    if !quiet {
        success(format!(
            "Recorded artifact for {} ({} skills produced)",
            style(&report.builder).cyan().bold(),
            report.skills_produced
        ));
        println!("    stored at {}", style(report.path.display()).dim());
        println!();
    }
    Ok(())
}

/// Import an artifact directory as a genesis builder draft.
pub async fn seed(state: &mut AppState, dir: &Path, json: bool, quiet: bool) -> Result<()> {
    let artifact = load(dir).await?;
    let builder = state.service.seed(artifact).await?;

    if json {
        return print_json(&builder);
    }
    if !quiet {
        success(format!(
            "Seeded genesis builder {}",
            style(&builder.name).cyan().bold()
        ));
        println!(
            "    stored as draft {}; publish with {}",
            style(builder.key()).dim(),
            style(format!("bpool publish {}", builder.name)).yellow()
        );
        println!();
    }
    Ok(())
}
