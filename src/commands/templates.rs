//! Template command handlers

use crate::cli::TemplateCommand;
use crate::commands::AppContext;
use crate::error::{PromptdeckError, Result};
use anyhow::Context;
use colored::Colorize;
use prettytable::{format, Table};

/// Handle the `template` subcommands.
pub fn handle_templates(ctx: &AppContext, command: TemplateCommand) -> Result<()> {
    match command {
        TemplateCommand::List { category } => {
            let summaries = ctx.templates.list(category.as_deref())?;
            if summaries.is_empty() {
                println!("{}", "No templates found.".yellow());
                return Ok(());
            }
            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(prettytable::row![
                "Id".bold(),
                "Name".bold(),
                "Category".bold(),
                "Variables".bold()
            ]);
            for summary in summaries {
                table.add_row(prettytable::row![
                    summary.id.cyan(),
                    summary.name,
                    summary.category.unwrap_or_else(|| "-".to_string()),
                    summary.variable_count
                ]);
            }
            table.printstd();
        }
        TemplateCommand::Show { id } => {
            let template = ctx.templates.load(&id)?;
            println!("{} ({})", template.metadata.name.bold(), template.metadata.id);
            if let Some(description) = &template.metadata.description {
                println!("{}", description);
            }
            if !template.metadata.variables.is_empty() {
                println!("\n{}", "Variables:".bold());
                for variable in &template.metadata.variables {
                    let required = if variable.required { " (required)" } else { "" };
                    let default = variable
                        .default
                        .as_ref()
                        .map(|d| format!(" [default: {}]", d))
                        .unwrap_or_default();
                    println!(
                        "  {}{}{}: {}",
                        variable.name.cyan(),
                        required.red(),
                        default.dimmed(),
                        variable.description.as_deref().unwrap_or("-")
                    );
                }
            }
            if let Some(system) = &template.system_prompt {
                println!("\n{}\n{}", "System prompt:".bold(), system);
            }
            println!("\n{}\n{}", "User prompt:".bold(), template.user_prompt);
        }
        TemplateCommand::Validate { id } => {
            let (ok, errors) = ctx.templates.validate(&id)?;
            if ok {
                println!("{} {}", "valid:".green(), id);
            } else {
                println!("{} {}", "invalid:".red(), id);
                for error in &errors {
                    println!("  - {}", error);
                }
                return Err(PromptdeckError::TemplateInvalid {
                    id,
                    message: format!("{} validation errors", errors.len()),
                }
                .into());
            }
        }
        TemplateCommand::New { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    PromptdeckError::InvalidConfig(format!(
                        "{} has no usable file name",
                        file.display()
                    ))
                })?;
            let path = ctx.templates.create(name, &body)?;
            println!("Created {}", path.display().to_string().cyan());
        }
    }
    Ok(())
}
