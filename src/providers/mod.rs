//! Provider gateway
//!
//! Uniform façade over heterogeneous execution backends. Callers name a
//! backend with a short string id and get back a normalized response with
//! token usage and wall-clock duration; whether the call was a subprocess,
//! a local HTTP request, or a remote HTTPS request stays hidden. The
//! gateway owns the per-call deadline and validates parameters before
//! dispatch.

use crate::config::Config;
use crate::error::{PromptdeckError, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub mod anthropic;
pub mod base;
pub mod catalog;
pub mod llamacpp;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use base::{
    Backend, BackendReply, ExecutionOutput, ExecutionRequest, GenerationParams, ModelInfo,
    TextStream, TokenUsage,
};
pub use catalog::{CatalogEntry, ModelCatalog};
pub use llamacpp::LlamaCppBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Uniform entry point for model execution
pub struct ProviderGateway {
    backends: HashMap<String, Box<dyn Backend>>,
    call_timeout: Duration,
}

impl ProviderGateway {
    /// Create an empty gateway with the given per-call deadline.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            backends: HashMap::new(),
            call_timeout,
        }
    }

    /// Create a gateway wired with the standard backend set: `llamacpp`
    /// (subprocess via the model catalog), `ollama` (local HTTP), and the
    /// `openai` / `anthropic` remote APIs.
    pub fn with_default_backends(config: &Config) -> Result<Self> {
        let call_timeout = Duration::from_secs(config.provider_call_timeout_seconds);
        let client = Client::builder()
            .timeout(call_timeout)
            .user_agent(concat!("promptdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                PromptdeckError::BackendUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        let mut gateway = Self::new(call_timeout);
        gateway.register(Box::new(LlamaCppBackend::new(config.model_catalog_path())));
        gateway.register(Box::new(OllamaBackend::new(
            client.clone(),
            ollama::DEFAULT_OLLAMA_HOST,
        )));
        gateway.register(Box::new(OpenAiBackend::new(
            client.clone(),
            openai::DEFAULT_OPENAI_BASE,
        )));
        gateway.register(Box::new(AnthropicBackend::new(
            client,
            anthropic::DEFAULT_ANTHROPIC_BASE,
        )));
        Ok(gateway)
    }

    /// Register (or replace) a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        let id = backend.id().to_string();
        self.backends.insert(id, backend);
    }

    /// Known backend identifiers, sorted.
    pub fn backend_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    fn backend(&self, backend_id: &str) -> Result<&dyn Backend> {
        self.backends
            .get(backend_id)
            .map(|backend| &**backend)
            .ok_or_else(|| {
                PromptdeckError::BackendUnavailable(format!("unknown backend '{}'", backend_id))
                    .into()
            })
    }

    /// Execute one prompt against `backend_id` / `model_id`.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` for an unknown backend id, `Timeout` when the
    /// call exceeds the configured deadline, `InvalidParameters` for
    /// out-of-range parameters, plus whatever the backend reports.
    pub async fn execute(
        &self,
        backend_id: &str,
        model_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        params: GenerationParams,
    ) -> Result<ExecutionOutput> {
        let backend = self.backend(backend_id)?;
        params.validate()?;

        let request = ExecutionRequest {
            model_id: model_id.to_string(),
            prompt: prompt.to_string(),
            system_prompt: system_prompt.map(str::to_string),
            params,
        };

        tracing::debug!("Dispatching prompt to {} ({})", backend_id, model_id);
        let start = Instant::now();
        let reply = tokio::time::timeout(self.call_timeout, backend.execute(&request))
            .await
            .map_err(|_| {
                PromptdeckError::Timeout(format!(
                    "{}: call exceeded {}s",
                    backend_id,
                    self.call_timeout.as_secs()
                ))
            })??;

        Ok(ExecutionOutput {
            text: reply.text,
            usage: reply.usage,
            duration: start.elapsed(),
        })
    }

    /// Execute one prompt, yielding incremental text chunks.
    ///
    /// The deadline applies to establishing the stream; chunk arrival is
    /// bounded by the underlying client's own timeout.
    pub async fn stream_execute(
        &self,
        backend_id: &str,
        model_id: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        params: GenerationParams,
    ) -> Result<TextStream> {
        let backend = self.backend(backend_id)?;
        params.validate()?;

        let request = ExecutionRequest {
            model_id: model_id.to_string(),
            prompt: prompt.to_string(),
            system_prompt: system_prompt.map(str::to_string),
            params,
        };

        tokio::time::timeout(self.call_timeout, backend.stream_execute(&request))
            .await
            .map_err(|_| {
                PromptdeckError::Timeout(format!(
                    "{}: call exceeded {}s",
                    backend_id,
                    self.call_timeout.as_secs()
                ))
            })?
    }

    /// List the models a backend can serve.
    pub async fn list_models(&self, backend_id: &str) -> Result<Vec<ModelInfo>> {
        self.backend(backend_id)?.list_models().await
    }
}
