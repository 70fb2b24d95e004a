//! Evolution commands: select, evolve, run, publish.

use anyhow::Result;
use console::style;

use buildpool_core::population::idea::FixedIdea;
use buildpool_core::population::selector::SelectionBranch;
use buildpool_core::service::pool::{
    EvolveOutcome, IterationReport, MutationReport, SelectionReport, SyncOutcome,
};
use buildpool_types::builder::{Builder, BuilderKey};
use buildpool_types::error::PoolError;

use super::display::{info, notice, print_json, spinner, success};
use super::pool::print_sync_outcome;
use crate::state::AppState;

fn resolve_key(state: &AppState, reference: &str) -> Result<BuilderKey, PoolError> {
    state
        .service
        .population()
        .resolve(reference)
        .map(Builder::key)
        .ok_or_else(|| PoolError::NotFound(reference.to_owned()))
}

fn branch_label(branch: SelectionBranch) -> console::StyledObject<String> {
    match branch {
        SelectionBranch::Exploit => style(branch.to_string()).green(),
        SelectionBranch::UniformFallback => style(branch.to_string()).yellow(),
        SelectionBranch::Explore => style(branch.to_string()).magenta(),
    }
}

fn print_selection(selection: &SelectionReport) {
    success(format!(
        "Selected {} ({})",
        style(&selection.name).cyan().bold(),
        branch_label(selection.branch)
    ));
    println!(
        "    fitness {:.2} · generation {} · {} skills",
        selection.fitness_score, selection.generation, selection.skills_produced
    );
}

/// Sync if the replica is stale, then select. Only a sync that actually
/// ran is reported.
async fn select_fresh(state: &mut AppState, json: bool, quiet: bool) -> Result<SelectionReport> {
    let progress = spinner("Checking replica freshness...", json || quiet);
    let result = state.service.select_fresh().await;
    progress.finish_and_clear();
    let (sync, selection) = result?;

    if !json && !quiet && !matches!(sync, SyncOutcome::Fresh) {
        print_sync_outcome(&sync);
    }
    Ok(selection)
}

/// Pick one builder with the epsilon-greedy policy.
pub async fn select(state: &mut AppState, json: bool) -> Result<()> {
    let selection = select_fresh(state, json, false).await?;

    if json {
        return print_json(&selection);
    }

    print_selection(&selection);
    println!();
    Ok(())
}

/// Evolve a parent (given or selected) into a child draft.
pub async fn evolve(
    state: &mut AppState,
    reference: Option<String>,
    idea: Option<String>,
    publish: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let parent_key = match reference {
        Some(reference) => resolve_key(state, &reference)?,
        None => {
            let selection = select_fresh(state, json, quiet).await?;
            if !json && !quiet {
                print_selection(&selection);
            }
            selection.builder_key()
        }
    };

    let progress = spinner("Rewriting instructions...", json || quiet);
    let outcome = state.service.evolve(&parent_key, idea).await;
    progress.finish_and_clear();

    let child = match outcome? {
        EvolveOutcome::NotEligible { parent, reason } => {
            if json {
                return print_json(&serde_json::json!({
                    "outcome": "not_eligible",
                    "parent": parent,
                    "reason": reason.to_string(),
                }));
            }
            if !quiet {
                notice(format!("'{parent}' is not eligible for mutation: {reason}"));
                println!();
            }
            return Ok(());
        }
        EvolveOutcome::Skipped {
            parent,
            rejection,
            attempts,
        } => {
            if json {
                return print_json(&serde_json::json!({
                    "outcome": "skipped",
                    "parent": parent,
                    "reason": rejection.to_string(),
                    "attempts": attempts,
                }));
            }
            if !quiet {
                notice(format!(
                    "Mutation of '{parent}' skipped after {attempts} attempts: {rejection}"
                ));
                println!();
            }
            return Ok(());
        }
        EvolveOutcome::Created { child, .. } => *child,
    };

    let child = if publish {
        let progress = spinner("Publishing to authority...", json || quiet);
        let published = state.service.publish(&child.key()).await;
        progress.finish_and_clear();
        published?
    } else {
        child
    };

    if json {
        return print_json(&child);
    }
    if quiet {
        return Ok(());
    }

    success(format!(
        "Created {} (generation {}, {})",
        style(&child.name).cyan().bold(),
        child.generation,
        child
            .mutation_type
            .map(|m| m.to_string())
            .unwrap_or_default()
    ));
    match &child.id {
        Some(id) => println!("    published as {}", style(id).green()),
        None => println!(
            "    stored as draft {}; publish with {}",
            style(child.key()).dim(),
            style(format!("bpool publish {}", child.key())).yellow()
        ),
    }
    println!();
    Ok(())
}

/// Publish a local draft.
pub async fn publish(state: &mut AppState, reference: &str, json: bool, quiet: bool) -> Result<()> {
    let key = resolve_key(state, reference)?;

    let progress = spinner("Publishing to authority...", json || quiet);
    let published = state.service.publish(&key).await;
    progress.finish_and_clear();
    let published = published?;

    if json {
        return print_json(&published);
    }
    if !quiet {
        success(format!(
            "Published {} as {}",
            style(&published.name).cyan().bold(),
            style(published.id.as_deref().unwrap_or_default()).green()
        ));
        println!();
    }
    Ok(())
}

fn print_iteration(index: u32, report: &IterationReport) {
    println!();
    println!("  {}", style(format!("── Iteration {index} ──")).dim());
    print_sync_outcome(&report.sync);
    print_selection(&report.selection);

    match &report.mutation {
        MutationReport::NotEligible { reason } => info(format!("Not eligible: {reason}")),
        MutationReport::Skipped { reason, attempts } => {
            notice(format!("Skipped after {attempts} attempts: {reason}"))
        }
        MutationReport::Created {
            key,
            name,
            generation,
            published_id,
            ..
        } => {
            let where_to = if published_id.is_some() {
                format!("published as {}", style(key).green())
            } else {
                format!("draft {}", style(key).dim())
            };
            success(format!(
                "Created {} (generation {generation}), {where_to}",
                style(name).cyan().bold()
            ));
        }
    }
}

/// Run `iterations` passes of the control loop.
///
/// A terminal failure stops the run and is reported with its stage.
pub async fn run(
    state: &mut AppState,
    iterations: u32,
    idea: Option<String>,
    publish: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let ideas = FixedIdea(idea);
    let mut reports = Vec::new();

    for index in 1..=iterations {
        let progress = spinner(&format!("Iteration {index}/{iterations}..."), json || quiet);
        let result = state.service.run_iteration(&ideas, publish).await;
        progress.finish_and_clear();

        let report = match result {
            Ok(report) => report,
            Err(failure) => {
                tracing::error!(
                    iteration = index,
                    stage = %failure.stage,
                    error = %failure.error,
                    "Iteration failed"
                );
                if json {
                    print_json(&reports)?;
                }
                return Err(failure.into());
            }
        };

        if !json && !quiet {
            print_iteration(index, &report);
        }
        reports.push(report);
    }

    if json {
        return print_json(&reports);
    }
    if !quiet {
        println!();
    }
    Ok(())
}
