//! OpenAI-compatible remote backend
//!
//! Calls the `/v1/chat/completions` endpoint of api.openai.com (or any
//! server speaking the same protocol). The API key is read from the
//! `OPENAI_API_KEY` environment variable at call time; the gateway is the
//! only component that consults it.

use crate::error::{PromptdeckError, Result};
use crate::providers::base::{
    classify_status, classify_transport_error, Backend, BackendReply, ExecutionRequest, ModelInfo,
    TokenUsage,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Default API root
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com";

/// Name of the environment variable holding the API key
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Remote HTTPS backend speaking the OpenAI chat protocol
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiBackend {
    /// Create a backend against `base_url` (default: api.openai.com).
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(OPENAI_API_KEY_VAR).map_err(|_| {
            PromptdeckError::AuthFailed(format!("openai: {} is not set", OPENAI_API_KEY_VAR))
                .into()
        })
    }

    fn request_body(request: &ExecutionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.prompt}));

        let mut body = serde_json::json!({
            "model": request.model_id,
            "messages": messages,
        });
        let map = body.as_object_mut().expect("body is an object");
        if let Some(t) = request.params.temperature {
            map.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(p) = request.params.top_p {
            map.insert("top_p".to_string(), serde_json::json!(p));
        }
        if let Some(m) = request.params.max_tokens {
            map.insert("max_tokens".to_string(), serde_json::json!(m));
        }
        // top_k and context_size have no wire equivalent here
        for (key, value) in &request.params.extra {
            map.insert(key.clone(), value.clone());
        }
        body
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn id(&self) -> &'static str {
        "openai"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendReply> {
        let key = self.api_key()?;
        let body = Self::request_body(request);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error("openai", &e))?;

        if !response.status().is_success() {
            return Err(classify_status("openai", &request.model_id, response.status()).into());
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|_| {
            PromptdeckError::ExecutionFailed("openai: malformed response body".to_string())
        })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            PromptdeckError::ExecutionFailed("openai: response carried no choices".to_string())
        })?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(BackendReply {
            text: choice.message.content,
            usage,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let key = self.api_key()?;
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| classify_transport_error("openai", &e))?;

        if !response.status().is_success() {
            return Err(classify_status("openai", "-", response.status()).into());
        }

        let parsed: ModelsResponse = response.json().await.map_err(|_| {
            PromptdeckError::ExecutionFailed("openai: malformed response body".to_string())
        })?;
        Ok(parsed
            .data
            .into_iter()
            .map(|entry| ModelInfo {
                display_name: entry.id.clone(),
                name: entry.id,
                context_window: None,
            })
            .collect())
    }
}
