//! Shared helpers for integration tests

#![allow(dead_code)]

use promptdeck::providers::{OllamaBackend, ProviderGateway};
use promptdeck::store::Store;
use promptdeck::templates::TemplateLibrary;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Open a store in a fresh temp directory.
pub fn temp_store() -> (Arc<Store>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("store.db"), Duration::from_secs(30))
        .expect("open store");
    (Arc::new(store), dir)
}

/// A gateway whose `ollama` backend points at the given mock server.
pub fn gateway_against(server: &MockServer) -> Arc<ProviderGateway> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client");
    let mut gateway = ProviderGateway::new(Duration::from_secs(5));
    gateway.register(Box::new(OllamaBackend::new(client, server.uri())));
    Arc::new(gateway)
}

/// Canned Ollama chat response body.
pub fn ollama_reply(content: &str, prompt_tokens: usize, completion_tokens: usize) -> serde_json::Value {
    serde_json::json!({
        "message": {"role": "assistant", "content": content},
        "done": true,
        "prompt_eval_count": prompt_tokens,
        "eval_count": completion_tokens,
    })
}

/// Mount a catch-all chat mock that echoes a fixed reply.
pub async fn mount_chat_ok(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply(content, 3, 5)))
        .mount(server)
        .await;
}

/// Mount a chat mock that rejects requests whose body contains `marker`.
/// Mount this before the catch-all so it wins for matching prompts.
pub async fn mount_chat_failing_on(server: &MockServer, marker: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_string_contains(marker))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

/// A template library rooted in a temp directory seeded with files.
pub fn temp_templates(files: &[(&str, &str)]) -> (Arc<TemplateLibrary>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, body) in files {
        std::fs::write(dir.path().join(name), body).expect("write template");
    }
    (Arc::new(TemplateLibrary::new(dir.path())), dir)
}
