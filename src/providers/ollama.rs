//! Ollama backend
//!
//! Talks to a local (or remote) Ollama server over HTTP. Uses `/api/chat`
//! for completions, `/api/tags` for model listing, and the NDJSON
//! streaming mode of `/api/chat` for incremental output.

use crate::error::{PromptdeckError, Result};
use crate::providers::base::{
    classify_status, classify_transport_error, Backend, BackendReply, ExecutionRequest, ModelInfo,
    TextStream, TokenUsage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default Ollama server address
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Local HTTP backend over an Ollama server
pub struct OllamaBackend {
    client: Client,
    host: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelTag {
    name: String,
}

impl OllamaBackend {
    /// Create a backend against `host` (e.g. `http://localhost:11434`).
    pub fn new(client: Client, host: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
        }
    }

    fn chat_request(request: &ExecutionRequest, stream: bool) -> OllamaChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(OllamaMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        // Logical parameters under their Ollama spellings
        let mut options = serde_json::Map::new();
        if let Some(t) = request.params.temperature {
            options.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(p) = request.params.top_p {
            options.insert("top_p".to_string(), serde_json::json!(p));
        }
        if let Some(k) = request.params.top_k {
            options.insert("top_k".to_string(), serde_json::json!(k));
        }
        if let Some(m) = request.params.max_tokens {
            options.insert("num_predict".to_string(), serde_json::json!(m));
        }
        if let Some(c) = request.params.context_size {
            options.insert("num_ctx".to_string(), serde_json::json!(c));
        }
        for (key, value) in &request.params.extra {
            options.insert(key.clone(), value.clone());
        }

        OllamaChatRequest {
            model: request.model_id.clone(),
            messages,
            stream,
            options,
        }
    }

    async fn send_chat(
        &self,
        request: &ExecutionRequest,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let body = Self::chat_request(request, stream);
        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error("ollama", &e))?;

        if !response.status().is_success() {
            return Err(classify_status("ollama", &request.model_id, response.status()).into());
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn id(&self) -> &'static str {
        "ollama"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendReply> {
        let response = self.send_chat(request, false).await?;
        let parsed: OllamaChatResponse = response.json().await.map_err(|_| {
            PromptdeckError::ExecutionFailed("ollama: malformed response body".to_string())
        })?;

        Ok(BackendReply {
            text: parsed.message.content,
            usage: TokenUsage::new(parsed.prompt_eval_count, parsed.eval_count),
        })
    }

    async fn stream_execute(&self, request: &ExecutionRequest) -> Result<TextStream> {
        let response = self.send_chat(request, true).await?;
        let bytes = response.bytes_stream();

        // NDJSON: one chat response object per line, `done: true` last
        let stream = futures::stream::try_unfold(
            (bytes, String::new(), false),
            |(mut bytes, mut buffer, mut done)| async move {
                loop {
                    if done {
                        return Ok(None);
                    }
                    if let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let chunk: OllamaChatResponse =
                            serde_json::from_str(line).map_err(|_| {
                                anyhow::Error::from(PromptdeckError::ExecutionFailed(
                                    "ollama: malformed stream chunk".to_string(),
                                ))
                            })?;
                        done = chunk.done;
                        return Ok(Some((chunk.message.content, (bytes, buffer, done))));
                    }
                    match bytes.next().await {
                        Some(Ok(data)) => buffer.push_str(&String::from_utf8_lossy(&data)),
                        Some(Err(e)) => {
                            return Err(anyhow::Error::from(classify_transport_error(
                                "ollama", &e,
                            )))
                        }
                        None => {
                            if buffer.trim().is_empty() {
                                return Ok(None);
                            }
                            // Final line without trailing newline
                            buffer.push('\n');
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .map_err(|e| classify_transport_error("ollama", &e))?;

        if !response.status().is_success() {
            return Err(PromptdeckError::ExecutionFailed(format!(
                "ollama: HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }

        let tags: OllamaTagsResponse = response.json().await.map_err(|_| {
            PromptdeckError::ExecutionFailed("ollama: malformed response body".to_string())
        })?;

        Ok(tags
            .models
            .into_iter()
            .map(|tag| ModelInfo {
                display_name: tag.name.clone(),
                name: tag.name,
                context_window: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::GenerationParams;
    use serde_json::json;

    fn sample_request() -> ExecutionRequest {
        ExecutionRequest {
            model_id: "llama3.2:latest".to_string(),
            prompt: "hello".to_string(),
            system_prompt: Some("be brief".to_string()),
            params: GenerationParams {
                temperature: Some(0.4),
                max_tokens: Some(64),
                context_size: Some(2048),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_chat_request_shape() {
        let body = OllamaBackend::chat_request(&sample_request(), false);
        assert_eq!(body.model, "llama3.2:latest");
        assert!(!body.stream);
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.options["temperature"], json!(0.4));
        assert_eq!(body.options["num_predict"], json!(64));
        assert_eq!(body.options["num_ctx"], json!(2048));
    }

    #[test]
    fn test_chat_request_without_system() {
        let mut request = sample_request();
        request.system_prompt = None;
        let body = OllamaBackend::chat_request(&request, true);
        assert!(body.stream);
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");
    }

    #[test]
    fn test_chat_request_extra_options() {
        let mut request = sample_request();
        request
            .params
            .extra
            .insert("mirostat".to_string(), json!(2));
        let body = OllamaBackend::chat_request(&request, false);
        assert_eq!(body.options["mirostat"], json!(2));
    }

    #[test]
    fn test_response_parsing() {
        let parsed: OllamaChatResponse = serde_json::from_str(
            r#"{"message": {"role": "assistant", "content": "hi"},
                "done": true, "prompt_eval_count": 12, "eval_count": 3}"#,
        )
        .unwrap();
        assert_eq!(parsed.message.content, "hi");
        assert!(parsed.done);
        assert_eq!(parsed.prompt_eval_count, 12);
        assert_eq!(parsed.eval_count, 3);
    }
}
