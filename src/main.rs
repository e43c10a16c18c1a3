//! promptdeck - operator CLI entry point

use colored::Colorize;
use promptdeck::cli::{Cli, Commands};
use promptdeck::commands::{self, AppContext};
use promptdeck::config::Config;
use promptdeck::error::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Ask {
            prompt,
            backend,
            model,
            template,
            vars,
            system,
            params,
            stream,
        } => {
            commands::ask::run_ask(
                &ctx,
                commands::ask::AskArgs {
                    prompt,
                    backend,
                    model,
                    template,
                    vars,
                    system,
                    params,
                    stream,
                },
            )
            .await
        }
        Commands::Chat {
            backend,
            model,
            system,
            resume,
        } => {
            commands::chat::run_chat(
                &ctx,
                commands::chat::ChatArgs {
                    backend,
                    model,
                    system,
                    resume,
                },
            )
            .await
        }
        Commands::Batch { command } => match command {
            promptdeck::cli::BatchCommand::Run {
                file,
                backend,
                model,
                params,
                stop_on_error,
            } => {
                commands::batch::run_batch(&ctx, &file, &backend, &model, &params, stop_on_error)
                    .await
            }
            promptdeck::cli::BatchCommand::Resume {
                job_id,
                file,
                params,
                stop_on_error,
            } => {
                commands::batch::resume_batch(&ctx, &job_id, &file, &params, stop_on_error).await
            }
        },
        Commands::Workflow { command } => match command {
            promptdeck::cli::WorkflowCommand::Run {
                workflow,
                backend,
                model,
                vars,
            } => commands::workflow::run_workflow(&ctx, &workflow, &backend, &model, &vars).await,
            promptdeck::cli::WorkflowCommand::List => commands::workflow::list(&ctx),
            promptdeck::cli::WorkflowCommand::Validate { workflow } => {
                commands::workflow::validate(&ctx, &workflow)
            }
        },
        Commands::History { command } => commands::history::handle_history(&ctx, command),
        Commands::Template { command } => commands::templates::handle_templates(&ctx, command),
        Commands::Models { backend } => commands::models::list_models(&ctx, &backend).await,
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "promptdeck=debug"
    } else {
        "promptdeck=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
