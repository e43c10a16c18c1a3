//! Workflow command handlers

use crate::commands::{cancellation_on_ctrl_c, vars_from_pairs, AppContext};
use crate::error::{PromptdeckError, Result};
use crate::workflow::{
    list_workflows, load_workflow, RunStatus, StepStatus, WorkflowDefinition, WorkflowEngine,
};
use colored::Colorize;
use prettytable::{format, Table};
use std::path::PathBuf;
use std::sync::Arc;

/// Resolve a workflow argument: a direct YAML path, or an id looked up in
/// the workflows directory.
fn resolve_workflow(ctx: &AppContext, reference: &str) -> Result<WorkflowDefinition> {
    let as_path = PathBuf::from(reference);
    if as_path.is_file() {
        return load_workflow(&as_path);
    }
    let in_dir = ctx.config.workflows_dir.join(format!("{}.yaml", reference));
    if in_dir.is_file() {
        return load_workflow(&in_dir);
    }
    Err(PromptdeckError::WorkflowInvalid(format!(
        "no workflow '{}' (looked for a file and in {})",
        reference,
        ctx.config.workflows_dir.display()
    ))
    .into())
}

/// Execute a workflow.
pub async fn run_workflow(
    ctx: &AppContext,
    reference: &str,
    backend: &str,
    model: &str,
    vars: &[(String, String)],
) -> Result<()> {
    let definition = resolve_workflow(ctx, reference)?;
    let engine = WorkflowEngine::new(
        Arc::clone(&ctx.gateway),
        Arc::clone(&ctx.templates),
        Arc::clone(&ctx.store),
        backend,
        model,
    );

    println!("Running workflow {} ({})", definition.name.bold(), definition.id);
    let cancel = cancellation_on_ctrl_c();
    let record = engine
        .execute(&definition, vars_from_pairs(vars), &cancel)
        .await?;

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["Step".bold(), "Status".bold(), "Output".bold()]);
    for step in &record.steps {
        let status = match step.status {
            StepStatus::Completed => "completed".green(),
            StepStatus::Failed => "failed".red(),
            StepStatus::Skipped => "skipped".yellow(),
        };
        let output = step
            .output
            .as_ref()
            .map(preview)
            .or_else(|| step.error.clone())
            .unwrap_or_default();
        table.add_row(prettytable::row![step.name, status, output]);
    }
    table.printstd();

    println!(
        "Run {} (session {})",
        match record.status {
            RunStatus::Completed => "completed".green(),
            RunStatus::Failed => "failed".red(),
        },
        record.session_id[..8].cyan(),
    );

    if record.status == RunStatus::Failed {
        if cancel.is_cancelled() {
            // A cancelled run left consistent state behind; no error exit
            println!("{}", "Run was cancelled.".yellow());
            return Ok(());
        }
        return Err(PromptdeckError::ExecutionFailed(format!(
            "workflow {} failed",
            definition.id
        ))
        .into());
    }
    Ok(())
}

/// List workflows in the configured directory.
pub fn list(ctx: &AppContext) -> Result<()> {
    let found = list_workflows(&ctx.config.workflows_dir)?;
    if found.is_empty() {
        println!("{}", "No workflows found.".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row!["Id".bold(), "Name".bold(), "File".bold()]);
    for (id, name, path) in found {
        table.add_row(prettytable::row![id.cyan(), name, path.display()]);
    }
    table.printstd();
    Ok(())
}

/// Validate a workflow without running it.
pub fn validate(ctx: &AppContext, reference: &str) -> Result<()> {
    let definition = resolve_workflow(ctx, reference)?;
    // Validation needs no live backends; the engine is used structurally
    let engine = WorkflowEngine::new(
        Arc::clone(&ctx.gateway),
        Arc::clone(&ctx.templates),
        Arc::clone(&ctx.store),
        "",
        "",
    );
    engine.validate(&definition)?;
    println!(
        "{} {} ({} steps)",
        "valid:".green(),
        definition.id,
        definition.steps.len()
    );
    Ok(())
}

fn preview(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 60 {
        let cut: String = flat.chars().take(57).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}
