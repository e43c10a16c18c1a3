//! Interactive chat handler
//!
//! Readline-based loop that sends each line to the selected backend and
//! persists both sides of the exchange. Sessions can be resumed by id.

use crate::commands::AppContext;
use crate::error::Result;
use crate::providers::GenerationParams;
use crate::store::Role;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Arguments for `chat`
pub struct ChatArgs {
    /// Backend id
    pub backend: String,
    /// Model id
    pub model: String,
    /// System prompt applied to every turn
    pub system: Option<String>,
    /// Session to resume (full id or unambiguous prefix)
    pub resume: Option<String>,
}

/// Run the interactive chat loop.
pub async fn run_chat(ctx: &AppContext, args: ChatArgs) -> Result<()> {
    let session_id = match &args.resume {
        Some(id_or_prefix) => {
            let session_id = ctx.store.resolve_session_id(id_or_prefix)?;
            let session = ctx.store.get_session(&session_id)?.ok_or_else(|| {
                crate::error::PromptdeckError::UnknownSession(session_id.clone())
            })?;
            println!(
                "Resuming {} ({} messages)",
                session_id[..8].cyan(),
                session.message_count
            );
            for message in ctx.store.get_messages(&session_id)? {
                print_turn(message.role, &message.content);
            }
            session_id
        }
        None => ctx.store.create_session(&args.model, None, None)?,
    };

    println!(
        "Chatting with {} via {}. {} to leave.",
        args.model.bold(),
        args.backend.bold(),
        "/quit".cyan()
    );

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match trimmed {
                    "/quit" | "/exit" => break,
                    "/id" => {
                        println!("{}", session_id);
                        continue;
                    }
                    _ => {}
                }
                editor.add_history_entry(trimmed).ok();

                ctx.store
                    .add_message(&session_id, Role::User, trimmed, None, None, None)?;

                match ctx
                    .gateway
                    .execute(
                        &args.backend,
                        &args.model,
                        trimmed,
                        args.system.as_deref(),
                        GenerationParams::default(),
                    )
                    .await
                {
                    Ok(output) => {
                        print_turn(Role::Assistant, &output.text);
                        ctx.store.add_message(
                            &session_id,
                            Role::Assistant,
                            &output.text,
                            Some(output.usage.total_tokens),
                            Some(output.duration.as_millis() as u64),
                            None,
                        )?;
                    }
                    Err(e) => {
                        // The turn is kept; the operator can retry
                        eprintln!("{} {}", "error:".red(), e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    println!(
        "Session {} saved. Resume with {}.",
        session_id[..8].cyan(),
        format!("promptdeck chat --model {} --resume {}", args.model, &session_id[..8]).cyan()
    );
    Ok(())
}

fn print_turn(role: Role, content: &str) {
    let label = match role {
        Role::User => "you".blue().bold(),
        Role::Assistant => "model".green().bold(),
        Role::System => "system".yellow().bold(),
    };
    println!("{}: {}", label, content);
}
