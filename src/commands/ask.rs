//! One-shot prompt handler
//!
//! Sends a single prompt (raw or rendered from a template) to a backend,
//! persists the exchange as a new session, and prints the response.

use crate::commands::{params_from_pairs, string_vars_from_pairs, AppContext};
use crate::error::{PromptdeckError, Result};
use crate::store::Role;
use colored::Colorize;
use futures::StreamExt;
use std::io::Write;

/// Arguments for `ask`
pub struct AskArgs {
    /// Raw prompt; exclusive with `template`
    pub prompt: Option<String>,
    /// Backend id
    pub backend: String,
    /// Model id
    pub model: String,
    /// Template id to render instead of a raw prompt
    pub template: Option<String>,
    /// Template variables
    pub vars: Vec<(String, String)>,
    /// System prompt override
    pub system: Option<String>,
    /// Generation parameters
    pub params: Vec<(String, String)>,
    /// Stream the response
    pub stream: bool,
}

/// Run a one-shot prompt.
pub async fn run_ask(ctx: &AppContext, args: AskArgs) -> Result<()> {
    let params = params_from_pairs(&args.params)?;

    let (user_prompt, system_prompt) = match (&args.template, &args.prompt) {
        (Some(template_id), _) => {
            let rendered = ctx
                .templates
                .render(template_id, &string_vars_from_pairs(&args.vars))?;
            let system = args.system.clone().or(rendered.system_prompt);
            (rendered.user_prompt, system)
        }
        (None, Some(prompt)) => (prompt.clone(), args.system.clone()),
        (None, None) => {
            return Err(PromptdeckError::InvalidConfig(
                "ask needs a prompt or --template".to_string(),
            )
            .into());
        }
    };

    let session_id = ctx.store.create_session(&args.model, None, None)?;
    ctx.store
        .add_message(&session_id, Role::User, &user_prompt, None, None, None)?;

    let (text, tokens, duration_ms) = if args.stream {
        let mut stream = ctx
            .gateway
            .stream_execute(
                &args.backend,
                &args.model,
                &user_prompt,
                system_prompt.as_deref(),
                params,
            )
            .await?;

        let started = std::time::Instant::now();
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            print!("{}", chunk);
            std::io::stdout().flush().ok();
            collected.push_str(&chunk);
        }
        println!();
        (collected, None, Some(started.elapsed().as_millis() as u64))
    } else {
        let output = ctx
            .gateway
            .execute(
                &args.backend,
                &args.model,
                &user_prompt,
                system_prompt.as_deref(),
                params,
            )
            .await?;
        println!("{}", output.text);
        (
            output.text,
            Some(output.usage.total_tokens),
            Some(output.duration.as_millis() as u64),
        )
    };

    ctx.store
        .add_message(&session_id, Role::Assistant, &text, tokens, duration_ms, None)?;

    eprintln!(
        "\n{} session {}",
        "saved".green(),
        &session_id[..8].cyan()
    );
    Ok(())
}
