//! Backend trait and common types for the provider gateway
//!
//! Every execution target (local subprocess, local HTTP server, remote
//! HTTPS API) implements the `Backend` trait. The gateway owns parameter
//! normalization and the per-call deadline; backends translate the logical
//! request into their native wire format and sanitize their native errors
//! into the shared taxonomy.

use crate::error::{PromptdeckError, Result};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

/// Token usage reported by a backend for one completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: usize,
    /// Number of tokens in the completion
    pub completion_tokens: usize,
    /// Total tokens used (prompt + completion)
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// The fixed logical parameter set exposed to callers
///
/// Backends receive these under their native spellings; fields the backend
/// has no equivalent for are dropped there. Values arriving under an alias
/// (`temp`, `ctx_size`, `max_new_tokens`, `num_ctx`) are folded into the
/// canonical field before dispatch; everything else is passed through
/// unchanged in `extra`.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f64>,
    /// Top-k sampling cutoff
    pub top_k: Option<u32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Context window size hint
    pub context_size: Option<u32>,
    /// Backend-specific fields passed through unmodified
    pub extra: HashMap<String, serde_json::Value>,
}

impl GenerationParams {
    /// Build parameters from a loose key/value map, resolving aliases.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` when a recognized key has the wrong
    /// type or an out-of-range value.
    pub fn from_map(map: &HashMap<String, serde_json::Value>) -> Result<Self> {
        let mut params = Self::default();
        for (key, value) in map {
            match resolve_alias(key) {
                "temperature" => params.temperature = Some(expect_f64(key, value)?),
                "top_p" => params.top_p = Some(expect_f64(key, value)?),
                "top_k" => params.top_k = Some(expect_u32(key, value)?),
                "max_tokens" => params.max_tokens = Some(expect_u32(key, value)?),
                "context_size" => params.context_size = Some(expect_u32(key, value)?),
                _ => {
                    params.extra.insert(key.clone(), value.clone());
                }
            }
        }
        params.validate()?;
        Ok(params)
    }

    /// Range-check the logical parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameters` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(invalid("temperature must be within [0, 2]"));
            }
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(invalid("top_p must be within (0, 1]"));
            }
        }
        if let Some(k) = self.top_k {
            if k == 0 {
                return Err(invalid("top_k must be positive"));
            }
        }
        if let Some(m) = self.max_tokens {
            if m == 0 {
                return Err(invalid("max_tokens must be positive"));
            }
        }
        if let Some(c) = self.context_size {
            if c == 0 {
                return Err(invalid("context_size must be positive"));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> anyhow::Error {
    PromptdeckError::InvalidParameters(message.to_string()).into()
}

fn resolve_alias(key: &str) -> &str {
    match key {
        "temp" => "temperature",
        "ctx_size" | "num_ctx" => "context_size",
        "max_new_tokens" => "max_tokens",
        other => other,
    }
}

fn expect_f64(key: &str, value: &serde_json::Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        PromptdeckError::InvalidParameters(format!("{} must be a number", key)).into()
    })
}

fn expect_u32(key: &str, value: &serde_json::Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            PromptdeckError::InvalidParameters(format!("{} must be a non-negative integer", key))
                .into()
        })
}

/// A normalized execution request handed to a backend
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Model identifier, in the backend's namespace
    pub model_id: String,
    /// User prompt text
    pub prompt: String,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Normalized generation parameters
    pub params: GenerationParams,
}

/// What a backend returns; the gateway attaches wall-clock duration
#[derive(Debug, Clone)]
pub struct BackendReply {
    /// Completion text
    pub text: String,
    /// Token usage, zeroed when the backend does not report it
    pub usage: TokenUsage,
}

/// The gateway's uniform response
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    /// Completion text
    pub text: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Wall-clock duration of the call
    pub duration: Duration,
}

/// A model known to a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Display name for user-facing listings
    pub display_name: String,
    /// Context window size in tokens, when reported
    pub context_window: Option<usize>,
}

/// Lazy stream of incremental completion text
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Execution backend behind the provider gateway
///
/// Implementations must sanitize their native failures into the shared
/// taxonomy; no transport-level exception text may escape.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier used for backend selection
    fn id(&self) -> &'static str;

    /// Run one prompt to completion
    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendReply>;

    /// Run one prompt, yielding incremental text chunks
    ///
    /// The default implementation reports that streaming is unsupported.
    async fn stream_execute(&self, _request: &ExecutionRequest) -> Result<TextStream> {
        Err(PromptdeckError::ExecutionFailed(format!(
            "{}: streaming is not supported by this backend",
            self.id()
        ))
        .into())
    }

    /// List the models this backend can serve
    ///
    /// The default implementation reports that listing is unsupported.
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Err(PromptdeckError::ExecutionFailed(format!(
            "{}: model listing is not supported by this backend",
            self.id()
        ))
        .into())
    }
}

/// Map a reqwest transport failure into the shared taxonomy without
/// leaking the underlying error text (which may embed URLs or payloads).
pub(crate) fn classify_transport_error(backend: &str, e: &reqwest::Error) -> PromptdeckError {
    if e.is_timeout() {
        PromptdeckError::Timeout(format!("{}: request timed out", backend))
    } else if e.is_connect() {
        PromptdeckError::BackendUnavailable(format!("{}: connection failed", backend))
    } else {
        PromptdeckError::BackendUnavailable(format!("{}: transport error", backend))
    }
}

/// Map a non-success HTTP status into the shared taxonomy.
pub(crate) fn classify_status(
    backend: &str,
    model_id: &str,
    status: reqwest::StatusCode,
) -> PromptdeckError {
    match status.as_u16() {
        401 | 403 => PromptdeckError::AuthFailed(format!("{}: credentials rejected", backend)),
        404 => PromptdeckError::ModelNotFound(format!("{}: {}", backend, model_id)),
        _ => PromptdeckError::ExecutionFailed(format!("{}: HTTP {}", backend, status.as_u16())),
    }
}
