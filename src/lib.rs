//! promptdeck - operator CLI for routing prompts to a fleet of model
//! backends
//!
//! The library provides the execution and persistence core behind the
//! `promptdeck` binary:
//!
//! - `store`: durable session store with full-text search
//! - `templates`: declarative prompt templates with named variables
//! - `providers`: uniform gateway over subprocess, local HTTP, and remote
//!   HTTPS backends
//! - `batch`: checkpointed batch execution with resume
//! - `workflow`: declarative DAG execution with variable scoping
//! - `config`: the single JSON configuration mapping
//! - `error`: error taxonomy and result alias
//! - `cli` / `commands`: the interactive wrapper
//!
//! # Example
//!
//! ```no_run
//! use promptdeck::config::Config;
//! use promptdeck::store::Store;
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let store = Store::open(&config.store_path, Duration::from_secs(30))?;
//!     let session = store.create_session("llama3.2:latest", None, None)?;
//!     store.add_message(
//!         &session,
//!         promptdeck::store::Role::User,
//!         "hello",
//!         None,
//!         None,
//!         None,
//!     )?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod providers;
pub mod store;
pub mod templates;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use error::{PromptdeckError, Result};
pub use providers::{GenerationParams, ProviderGateway};
pub use store::Store;
pub use templates::TemplateLibrary;
pub use workflow::WorkflowEngine;
