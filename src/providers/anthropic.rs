//! Anthropic remote backend
//!
//! Calls the `/v1/messages` endpoint. The API key is read from the
//! `ANTHROPIC_API_KEY` environment variable at call time.

use crate::error::{PromptdeckError, Result};
use crate::providers::base::{
    classify_status, classify_transport_error, Backend, BackendReply, ExecutionRequest,
    TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Default API root
pub const DEFAULT_ANTHROPIC_BASE: &str = "https://api.anthropic.com";

/// Name of the environment variable holding the API key
pub const ANTHROPIC_API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Protocol version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The messages endpoint requires max_tokens; used when the caller sets none
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Remote HTTPS backend speaking the Anthropic messages protocol
pub struct AnthropicBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

impl AnthropicBackend {
    /// Create a backend against `base_url` (default: api.anthropic.com).
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(ANTHROPIC_API_KEY_VAR).map_err(|_| {
            PromptdeckError::AuthFailed(format!(
                "anthropic: {} is not set",
                ANTHROPIC_API_KEY_VAR
            ))
            .into()
        })
    }

    fn request_body(request: &ExecutionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model_id,
            "max_tokens": request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": request.prompt}],
        });
        let map = body.as_object_mut().expect("body is an object");
        if let Some(system) = &request.system_prompt {
            map.insert("system".to_string(), serde_json::json!(system));
        }
        if let Some(t) = request.params.temperature {
            map.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(p) = request.params.top_p {
            map.insert("top_p".to_string(), serde_json::json!(p));
        }
        if let Some(k) = request.params.top_k {
            map.insert("top_k".to_string(), serde_json::json!(k));
        }
        for (key, value) in &request.params.extra {
            map.insert(key.clone(), value.clone());
        }
        body
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn id(&self) -> &'static str {
        "anthropic"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendReply> {
        let key = self.api_key()?;
        let body = Self::request_body(request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error("anthropic", &e))?;

        if !response.status().is_success() {
            return Err(classify_status("anthropic", &request.model_id, response.status()).into());
        }

        let parsed: MessagesResponse = response.json().await.map_err(|_| {
            PromptdeckError::ExecutionFailed("anthropic: malformed response body".to_string())
        })?;
        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Ok(BackendReply { text, usage })
    }
}
