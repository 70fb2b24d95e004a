//! Replica inspection and sync commands: status, sync, list, show.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use buildpool_core::population::reconciler::ApplyReport;
use buildpool_core::service::pool::SyncOutcome;
use buildpool_types::builder::Builder;
use buildpool_types::error::PoolError;

use super::display::{format_relative_time, info, notice, print_json, spinner, success, truncate};
use crate::state::AppState;

/// Display the population status dashboard.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let status = state.service.status().await?;

    if json {
        let value = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "authority_url": state.config.authority_url,
            "population": status,
        });
        return print_json(&value);
    }

    println!();
    println!("  {} buildpool v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Population ──").dim());
    println!("  Builders:       {}", style(status.size).bold());
    println!("  Published:      {}", style(status.published).green());
    if status.drafts > 0 {
        println!("  Drafts:         {}", style(status.drafts).yellow());
    }
    println!("  Total fitness:  {:.2}", status.total_fitness);
    match status.max_generation {
        Some(generation) => println!("  Max generation: {generation}"),
        None => println!("  Max generation: {}", style("-").dim()),
    }
    println!();

    println!("  {}", style("── Sync ──").dim());
    println!("  Authority:      {}", style(&state.config.authority_url).cyan());
    match &status.last_sync {
        Some(at) => println!("  Last sync:      {}", format_relative_time(at)),
        None => println!("  Last sync:      {}", style("never").yellow()),
    }
    if status.sync_required {
        println!("  State:          {}", style("stale (sync required)").yellow());
    } else {
        println!("  State:          {}", style("fresh").green());
    }
    println!();

    println!("  {}", style("── Storage ──").dim());
    println!("  Data dir:       {}", style(state.data_dir.display()).dim());
    println!();

    Ok(())
}

/// Reconcile with the authority.
///
/// Without `force` the exchange only happens when the replica is stale.
pub async fn sync(state: &mut AppState, force: bool, json: bool, quiet: bool) -> Result<()> {
    let progress = spinner("Syncing with authority...", json || quiet);
    let outcome = if force {
        state.service.sync().await
    } else {
        state.service.ensure_fresh().await
    };
    progress.finish_and_clear();
    let outcome = outcome?;

    if json {
        return print_json(&outcome);
    }
    if quiet {
        return Ok(());
    }

    print_sync_outcome(&outcome);
    println!();
    Ok(())
}

pub(crate) fn print_sync_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Fresh => info("Replica is fresh; no sync needed (use --force to sync anyway)"),
        SyncOutcome::Synced(report) => print_apply_report(report),
        SyncOutcome::Stale { attempts, reason } => notice(format!(
            "Authority unavailable after {attempts} attempt{}: {}\n    Using the last-known-good replica.",
            if *attempts == 1 { "" } else { "s" },
            style(reason).dim()
        )),
    }
}

fn print_apply_report(report: &ApplyReport) {
    if !report.rejected.is_empty() {
        notice(format!(
            "Ignored {} unsafe record(s) from the authority: {}",
            report.rejected.len(),
            style(report.rejected.join(", ")).dim()
        ));
    }

    if report.is_noop() {
        success("Synced; replica already matches the authority");
        return;
    }

    success(format!(
        "Synced: {} added, {} updated, {} culled",
        style(report.added.len()).green(),
        style(report.updated.len()).cyan(),
        style(report.culled.len()).red()
    ));
    for id in &report.added {
        println!("    {} {}", style("+").green(), id);
    }
    for id in &report.culled {
        println!("    {} {}", style("-").red(), id);
    }
    if !report.missing_culls.is_empty() {
        println!(
            "    {} {} cull id(s) not present locally",
            style("•").dim(),
            report.missing_culls.len()
        );
    }
}

/// List builders in a table, highest fitness first.
pub async fn list(state: &AppState, drafts_only: bool, json: bool) -> Result<()> {
    let mut builders: Vec<&Builder> = state
        .service
        .population()
        .iter()
        .filter(|b| !drafts_only || !b.is_published())
        .collect();
    builders.sort_by(|a, b| b.fitness_score.total_cmp(&a.fitness_score));

    if json {
        let rows: Vec<_> = builders
            .iter()
            .map(|b| {
                serde_json::json!({
                    "key": b.key().to_string(),
                    "id": b.id,
                    "name": b.name,
                    "fitness_score": b.fitness_score,
                    "generation": b.generation,
                    "skills_produced": b.skills_produced,
                    "mutation_type": b.mutation_type,
                    "published": b.is_published(),
                })
            })
            .collect();
        return print_json(&rows);
    }

    if builders.is_empty() {
        info(format!(
            "No builders found. Sync with {} or import one with {}",
            style("bpool sync").yellow(),
            style("bpool seed <dir>").yellow()
        ));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Key").fg(Color::White),
        Cell::new("Fitness").fg(Color::White),
        Cell::new("Gen").fg(Color::White),
        Cell::new("Skills").fg(Color::White),
        Cell::new("Mutation").fg(Color::White),
    ]);

    for builder in &builders {
        let key_cell = if builder.is_published() {
            Cell::new(truncate(&builder.key().to_string(), 24)).fg(Color::White)
        } else {
            Cell::new("draft").fg(Color::Yellow)
        };
        let mutation = builder
            .mutation_type
            .map(|m| m.to_string())
            .unwrap_or_else(|| "genesis".to_owned());

        table.add_row(vec![
            Cell::new(&builder.name).fg(Color::Cyan),
            key_cell,
            Cell::new(format!("{:.2}", builder.fitness_score)),
            Cell::new(builder.generation),
            Cell::new(builder.skills_produced),
            Cell::new(mutation).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} builder{}",
        style(builders.len()).bold(),
        if builders.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Show a builder's lineage, scores, and instruction preview.
pub async fn show(state: &AppState, reference: &str, json: bool) -> Result<()> {
    let builder = state
        .service
        .population()
        .resolve(reference)
        .ok_or_else(|| PoolError::NotFound(reference.to_owned()))?;

    if json {
        return print_json(builder);
    }

    let preview = builder
        .instruction_text
        .split("---")
        .nth(2)
        .unwrap_or(&builder.instruction_text)
        .trim()
        .lines()
        .take(8)
        .collect::<Vec<_>>()
        .join("\n");

    println!();
    println!("  {}", style(&builder.name).cyan().bold());
    println!("  {}", style(&builder.description).dim());
    println!();

    println!("  {}", style("── Details ──").dim());
    println!("  {}         {}", style("Key:").bold(), builder.key());
    if !builder.is_published() {
        println!("  {}      {}", style("Status:").bold(), style("unpublished draft").yellow());
    }
    println!("  {}     {:.2}", style("Fitness:").bold(), builder.fitness_score);
    println!("  {}  {}", style("Generation:").bold(), builder.generation);
    println!("  {}      {}", style("Skills:").bold(), builder.skills_produced);
    if let Some(runtime) = &builder.agent_runtime {
        println!("  {}     {}", style("Runtime:").bold(), runtime);
    }
    println!(
        "  {}     {}",
        style("Created:").bold(),
        format_relative_time(&builder.created_at)
    );
    println!();

    println!("  {}", style("── Lineage ──").dim());
    if builder.is_genesis() {
        println!("  genesis");
    } else {
        println!(
            "  {} via {}",
            builder.parent_ids.join(", "),
            builder
                .mutation_type
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unknown".to_owned())
        );
    }
    println!();

    if !builder.supporting_files.is_empty() {
        println!("  {}", style("── Files ──").dim());
        for (path, content) in &builder.supporting_files {
            println!("  {} {} {}", style("•").dim(), path, style(format!("({} bytes)", content.len())).dim());
        }
        println!();
    }

    println!("  {}", style("── Instructions ──").dim());
    for line in preview.lines() {
        println!("  {line}");
    }
    println!();

    Ok(())
}
