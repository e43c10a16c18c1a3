//! Batch command handlers

use crate::batch::{BatchProcessor, BatchResult, FailurePolicy, JobStatus};
use crate::commands::{cancellation_on_ctrl_c, params_from_pairs, AppContext};
use crate::error::{PromptdeckError, Result};
use colored::Colorize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Read a prompt file: one prompt per line, blank lines skipped.
fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PromptdeckError::InvalidConfig(format!("{}: {}", path.display(), e))
    })?;
    let prompts: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if prompts.is_empty() {
        return Err(PromptdeckError::InvalidConfig(format!(
            "{} contains no prompts",
            path.display()
        ))
        .into());
    }
    Ok(prompts)
}

fn progress_line(done: usize, total: usize) {
    eprint!("\r{} {}/{} prompts", "progress:".bold(), done, total);
    std::io::stderr().flush().ok();
}

fn print_summary(job_id: &str, status: JobStatus, results: &[BatchResult]) {
    eprintln!();
    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = results.len() - succeeded;
    let status_text = match status {
        JobStatus::Completed => "completed".green(),
        JobStatus::Paused => "paused".yellow(),
        JobStatus::Failed => "failed".red(),
        other => format!("{:?}", other).normal(),
    };
    println!(
        "Job {} {}: {} ok, {} failed",
        job_id.cyan(),
        status_text,
        succeeded,
        failed
    );
    for (index, result) in results.iter().enumerate() {
        if let Some(error) = &result.error {
            println!("  {} prompt {}: {}", "!".red(), index, error);
        }
    }
    if status == JobStatus::Paused {
        println!(
            "Resume with {}.",
            format!("promptdeck batch resume {} <file>", job_id).cyan()
        );
    }
}

/// Run a new batch job from a prompt file.
pub async fn run_batch(
    ctx: &AppContext,
    file: &Path,
    backend: &str,
    model: &str,
    params: &[(String, String)],
    stop_on_error: bool,
) -> Result<()> {
    let prompts = read_prompts(file)?;
    let params = params_from_pairs(params)?;
    let policy = if stop_on_error {
        FailurePolicy::Stop
    } else {
        FailurePolicy::Continue
    };

    let processor = BatchProcessor::new(
        Arc::clone(&ctx.gateway),
        &ctx.config.checkpoints_dir,
        ctx.config.batch_checkpoint_interval,
    );
    let mut job = processor.create_job(backend, model, prompts, params, policy);
    println!("Starting job {} ({} prompts)", job.job_id.cyan(), job.prompts.len());

    let cancel = cancellation_on_ctrl_c();
    let results = processor
        .execute(&mut job, Some(&progress_line), &cancel)
        .await?;

    print_summary(&job.job_id, job.status, &results);
    if job.status == JobStatus::Failed {
        return Err(PromptdeckError::ExecutionFailed(format!(
            "batch job {} failed",
            job.job_id
        ))
        .into());
    }
    Ok(())
}

/// Resume a checkpointed batch job.
pub async fn resume_batch(
    ctx: &AppContext,
    job_id: &str,
    file: &Path,
    params: &[(String, String)],
    stop_on_error: bool,
) -> Result<()> {
    let prompts = read_prompts(file)?;
    let params = params_from_pairs(params)?;
    let policy = if stop_on_error {
        FailurePolicy::Stop
    } else {
        FailurePolicy::Continue
    };

    let processor = BatchProcessor::new(
        Arc::clone(&ctx.gateway),
        &ctx.config.checkpoints_dir,
        ctx.config.batch_checkpoint_interval,
    );

    let cancel = cancellation_on_ctrl_c();
    let (job, results) = processor
        .resume(job_id, prompts, params, policy, Some(&progress_line), &cancel)
        .await?;

    print_summary(&job.job_id, job.status, &results);
    if job.status == JobStatus::Failed {
        return Err(PromptdeckError::ExecutionFailed(format!(
            "batch job {} failed",
            job.job_id
        ))
        .into());
    }
    Ok(())
}
