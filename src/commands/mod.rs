/*!
Command handlers for the CLI

Each submodule handles one top-level command. Handlers are intentionally
small: they wire the store, template library, and provider gateway
together, convert CLI arguments, and render results for the terminal.
*/

use crate::config::Config;
use crate::error::Result;
use crate::providers::{GenerationParams, ProviderGateway};
use crate::store::Store;
use crate::templates::TemplateLibrary;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod ask;
pub mod batch;
pub mod chat;
pub mod history;
pub mod models;
pub mod templates;
pub mod workflow;

/// Shared handles used by every command handler
pub struct AppContext {
    /// Loaded configuration
    pub config: Config,
    /// Session store
    pub store: Arc<Store>,
    /// Template library
    pub templates: Arc<TemplateLibrary>,
    /// Provider gateway with the default backend set
    pub gateway: Arc<ProviderGateway>,
}

impl AppContext {
    /// Open the store and wire the default backends from configuration.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(Store::open(
            &config.store_path,
            Duration::from_secs(config.store_write_timeout_seconds),
        )?);
        let templates = Arc::new(TemplateLibrary::new(&config.templates_dir));
        let gateway = Arc::new(ProviderGateway::with_default_backends(&config)?);
        Ok(Self {
            config,
            store,
            templates,
            gateway,
        })
    }
}

/// Token that trips on the first Ctrl-C so long-running drivers can stop
/// at their next boundary.
pub fn cancellation_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; finishing the current call");
            trip.cancel();
        }
    });
    token
}

/// Convert repeated `--param name=value` pairs into generation
/// parameters. Values are parsed as JSON when possible so numbers stay
/// numbers; anything else is passed as a string.
pub fn params_from_pairs(pairs: &[(String, String)]) -> Result<GenerationParams> {
    let mut map = HashMap::new();
    for (key, raw) in pairs {
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
        map.insert(key.clone(), value);
    }
    GenerationParams::from_map(&map)
}

/// Convert repeated `--var name=value` pairs into a scope map, parsing
/// values as JSON when possible.
pub fn vars_from_pairs(pairs: &[(String, String)]) -> HashMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            (key.clone(), value)
        })
        .collect()
}

/// String-valued variant of `vars_from_pairs` for template rendering.
pub fn string_vars_from_pairs(pairs: &[(String, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
