//! Command-line interface definition for promptdeck
//!
//! Defines the CLI structure using clap's derive API: one-shot prompts,
//! interactive chat, batch jobs, workflows, history, templates, and model
//! listing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// promptdeck - route prompts to local and cloud model backends
#[derive(Parser, Debug, Clone)]
#[command(name = "promptdeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Parse a `key=value` argument
fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send a single prompt (or rendered template) to a model
    Ask {
        /// Prompt text; omit when using --template
        prompt: Option<String>,

        /// Backend to execute against
        #[arg(short, long, default_value = "ollama")]
        backend: String,

        /// Model identifier
        #[arg(short, long)]
        model: String,

        /// Render a template instead of a raw prompt
        #[arg(short, long)]
        template: Option<String>,

        /// Template variable, repeatable (name=value)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,

        /// System prompt override
        #[arg(long)]
        system: Option<String>,

        /// Generation parameter, repeatable (name=value)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Stream the response as it is generated
        #[arg(long)]
        stream: bool,
    },

    /// Start an interactive chat session
    Chat {
        /// Backend to execute against
        #[arg(short, long, default_value = "ollama")]
        backend: String,

        /// Model identifier
        #[arg(short, long)]
        model: String,

        /// System prompt applied to every turn
        #[arg(long)]
        system: Option<String>,

        /// Resume an existing session (full id or unambiguous prefix)
        #[arg(short, long)]
        resume: Option<String>,
    },

    /// Run batched prompts with checkpointing
    Batch {
        /// Batch subcommand
        #[command(subcommand)]
        command: BatchCommand,
    },

    /// Execute and inspect workflows
    Workflow {
        /// Workflow subcommand
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Browse and manage stored sessions
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Manage prompt templates
    Template {
        /// Template subcommand
        #[command(subcommand)]
        command: TemplateCommand,
    },

    /// List models known to a backend
    Models {
        /// Backend to query
        #[arg(short, long, default_value = "ollama")]
        backend: String,
    },
}

/// Batch subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum BatchCommand {
    /// Run a new batch job from a prompt file (one prompt per line)
    Run {
        /// File with one prompt per line
        file: PathBuf,

        /// Backend to execute against
        #[arg(short, long, default_value = "ollama")]
        backend: String,

        /// Model identifier
        #[arg(short, long)]
        model: String,

        /// Generation parameter, repeatable (name=value)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Abort the job on the first failed prompt
        #[arg(long)]
        stop_on_error: bool,
    },

    /// Resume a checkpointed job
    Resume {
        /// Job identifier
        job_id: String,

        /// The job's original prompt file
        file: PathBuf,

        /// Generation parameter, repeatable (name=value)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Abort the job on the first failed prompt
        #[arg(long)]
        stop_on_error: bool,
    },
}

/// Workflow subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum WorkflowCommand {
    /// Execute a workflow by id (from the workflows directory) or path
    Run {
        /// Workflow id or YAML file path
        workflow: String,

        /// Backend for prompt/template steps without an override
        #[arg(short, long, default_value = "ollama")]
        backend: String,

        /// Model for prompt/template steps without an override
        #[arg(short, long)]
        model: String,

        /// Variable override, repeatable (name=value)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// List workflows in the workflows directory
    List,

    /// Validate a workflow without executing it
    Validate {
        /// Workflow id or YAML file path
        workflow: String,
    },
}

/// History subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List stored sessions, newest activity first
    List {
        /// Maximum sessions to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Sessions to skip
        #[arg(short, long)]
        offset: Option<usize>,
    },

    /// Show one session with its messages
    Show {
        /// Session id or unambiguous prefix
        id: String,
    },

    /// Full-text search across titles and message content
    Search {
        /// Query; double-quote phrases for exact matching
        query: String,
    },

    /// Attach a tag to a session
    Tag {
        /// Session id or unambiguous prefix
        id: String,

        /// Tag to attach
        tag: String,
    },

    /// List all tags with usage counts
    Tags,

    /// Export a session to the outputs directory
    Export {
        /// Session id or unambiguous prefix
        id: String,

        /// Export format: json or markdown
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Explicit output path (defaults into the outputs directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete a session and everything it owns
    Delete {
        /// Session id or unambiguous prefix
        id: String,
    },

    /// Delete sessions older than the retention window
    Cleanup {
        /// Age cutoff in days (defaults to the configured retention)
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Template subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TemplateCommand {
    /// List templates
    List {
        /// Only show templates in this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show a template's metadata and bodies
    Show {
        /// Template identifier
        id: String,
    },

    /// Validate a template
    Validate {
        /// Template identifier
        id: String,
    },

    /// Create a template from a YAML file
    New {
        /// Source YAML file; the file stem becomes the template id
        file: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "promptdeck",
            "ask",
            "--model",
            "llama3.2:latest",
            "hello there",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                prompt,
                backend,
                model,
                ..
            } => {
                assert_eq!(prompt.as_deref(), Some("hello there"));
                assert_eq!(backend, "ollama");
                assert_eq!(model, "llama3.2:latest");
            }
            other => panic!("expected ask, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ask_with_template_vars() {
        let cli = Cli::try_parse_from([
            "promptdeck",
            "ask",
            "--model",
            "m",
            "--template",
            "explain",
            "--var",
            "topic=trees",
            "--var",
            "audience=kids",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                template, vars, ..
            } => {
                assert_eq!(template.as_deref(), Some("explain"));
                assert_eq!(vars.len(), 2);
                assert_eq!(vars[0], ("topic".to_string(), "trees".to_string()));
            }
            other => panic!("expected ask, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_var() {
        let result =
            Cli::try_parse_from(["promptdeck", "ask", "--model", "m", "--var", "novalue", "p"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_batch_run() {
        let cli = Cli::try_parse_from([
            "promptdeck",
            "batch",
            "run",
            "prompts.txt",
            "--model",
            "m",
            "--stop-on-error",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch {
                command:
                    BatchCommand::Run {
                        file,
                        stop_on_error,
                        ..
                    },
            } => {
                assert_eq!(file, PathBuf::from("prompts.txt"));
                assert!(stop_on_error);
            }
            other => panic!("expected batch run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_workflow_run_with_vars() {
        let cli = Cli::try_parse_from([
            "promptdeck",
            "workflow",
            "run",
            "daily-digest",
            "--model",
            "m",
            "--var",
            "topic=rust",
        ])
        .unwrap();
        match cli.command {
            Commands::Workflow {
                command: WorkflowCommand::Run { workflow, vars, .. },
            } => {
                assert_eq!(workflow, "daily-digest");
                assert_eq!(vars[0].0, "topic");
            }
            other => panic!("expected workflow run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_history_commands() {
        assert!(Cli::try_parse_from(["promptdeck", "history", "list"]).is_ok());
        assert!(Cli::try_parse_from(["promptdeck", "history", "search", "borrow checker"]).is_ok());
        assert!(Cli::try_parse_from(["promptdeck", "history", "cleanup", "--days", "7"]).is_ok());
        assert!(
            Cli::try_parse_from(["promptdeck", "history", "export", "abcd", "-f", "json"]).is_ok()
        );
    }

    #[test]
    fn test_parse_models() {
        let cli =
            Cli::try_parse_from(["promptdeck", "models", "--backend", "llamacpp"]).unwrap();
        match cli.command {
            Commands::Models { backend } => assert_eq!(backend, "llamacpp"),
            other => panic!("expected models, got {:?}", other),
        }
    }
}
