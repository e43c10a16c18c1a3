//! History command handlers

use crate::cli::HistoryCommand;
use crate::commands::AppContext;
use crate::error::{PromptdeckError, Result};
use crate::store::{ExportFormat, Role, Session};
use anyhow::Context;
use colored::Colorize;
use prettytable::{format, Table};

/// Handle the `history` subcommands.
pub fn handle_history(ctx: &AppContext, command: HistoryCommand) -> Result<()> {
    match command {
        HistoryCommand::List { limit, offset } => {
            let sessions = ctx.store.list_sessions(limit, offset)?;
            print_sessions(&sessions);
        }
        HistoryCommand::Show { id } => {
            let session_id = ctx.store.resolve_session_id(&id)?;
            let session = ctx
                .store
                .get_session(&session_id)?
                .ok_or_else(|| PromptdeckError::UnknownSession(session_id.clone()))?;

            let title = if session.title.is_empty() {
                "(untitled)"
            } else {
                &session.title
            };
            println!("{} {}", title.bold(), format!("[{}]", session.id).dimmed());
            println!(
                "model {} · {} messages · {} tokens",
                session.model_id, session.message_count, session.total_tokens
            );
            println!();
            for message in ctx.store.get_messages(&session_id)? {
                let label = match message.role {
                    Role::User => "user".blue().bold(),
                    Role::Assistant => "assistant".green().bold(),
                    Role::System => "system".yellow().bold(),
                };
                println!("{} {}", format!("{:>3}", message.seq).dimmed(), label);
                println!("{}", message.content);
                println!();
            }
        }
        HistoryCommand::Search { query } => {
            let sessions = ctx.store.search(&query)?;
            if sessions.is_empty() {
                println!("{}", "No matching sessions.".yellow());
            } else {
                print_sessions(&sessions);
            }
        }
        HistoryCommand::Tag { id, tag } => {
            let session_id = ctx.store.resolve_session_id(&id)?;
            ctx.store.add_tag(&session_id, &tag)?;
            println!("Tagged {} with {}", session_id[..8].cyan(), tag.bold());
        }
        HistoryCommand::Tags => {
            let tags = ctx.store.all_tags()?;
            if tags.is_empty() {
                println!("{}", "No tags yet.".yellow());
                return Ok(());
            }
            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(prettytable::row!["Tag".bold(), "Sessions".bold()]);
            for (tag, count) in tags {
                table.add_row(prettytable::row![tag, count]);
            }
            table.printstd();
        }
        HistoryCommand::Export { id, format, out } => {
            let session_id = ctx.store.resolve_session_id(&id)?;
            let export_format = ExportFormat::parse_str(&format).ok_or_else(|| {
                PromptdeckError::InvalidConfig(format!("unknown export format '{}'", format))
            })?;
            let bytes = ctx.store.export_session(&session_id, export_format)?;

            let path = match out {
                Some(path) => path,
                None => {
                    std::fs::create_dir_all(&ctx.config.outputs_dir)
                        .context("Failed to create outputs directory")?;
                    ctx.config.outputs_dir.join(format!(
                        "{}.{}",
                        &session_id[..8],
                        export_format.extension()
                    ))
                }
            };
            std::fs::write(&path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported to {}", path.display().to_string().cyan());
        }
        HistoryCommand::Delete { id } => {
            let session_id = ctx.store.resolve_session_id(&id)?;
            ctx.store.delete_session(&session_id)?;
            println!("{}", format!("Deleted session {}", session_id).green());
        }
        HistoryCommand::Cleanup { days } => {
            let days = days.unwrap_or(ctx.config.retention_days);
            let removed = ctx.store.cleanup_older_than(days)?;
            println!(
                "Removed {} sessions older than {} days",
                removed.to_string().bold(),
                days
            );
        }
    }
    Ok(())
}

fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("{}", "No stored sessions.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Model".bold(),
        "Messages".bold(),
        "Last Activity".bold()
    ]);

    for session in sessions {
        let id_short = &session.id[..8];
        let title = if session.title.is_empty() {
            "(untitled)".to_string()
        } else if session.title.len() > 40 {
            format!("{}...", &session.title[..37])
        } else {
            session.title.clone()
        };
        let updated = session.updated_at.format("%Y-%m-%d %H:%M").to_string();
        table.add_row(prettytable::row![
            id_short.cyan(),
            title,
            session.model_id,
            session.message_count,
            updated
        ]);
    }

    table.printstd();
    println!();
    println!(
        "Use {} to inspect a session.",
        "promptdeck history show <ID>".cyan()
    );
}
