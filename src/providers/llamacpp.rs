//! Local subprocess backend
//!
//! Invokes a native llama.cpp-style inference binary for each request.
//! Model identifiers are resolved to model files through the JSON catalog;
//! the catalog also names the binary. Token usage is not reported by the
//! subprocess, so usage comes back zeroed.

use crate::error::{PromptdeckError, Result};
use crate::providers::base::{Backend, BackendReply, ExecutionRequest, ModelInfo, TokenUsage};
use crate::providers::catalog::ModelCatalog;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Default generation length when the caller sets no `max_tokens`
const DEFAULT_PREDICT: u32 = 512;

/// Subprocess backend over a local inference binary
pub struct LlamaCppBackend {
    catalog_path: PathBuf,
}

impl LlamaCppBackend {
    /// Create a backend reading its model catalog from `catalog_path`.
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
        }
    }

    fn build_args(request: &ExecutionRequest, entry_path: &PathBuf) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-m".into(),
            entry_path.display().to_string(),
            "--no-display-prompt".into(),
            "-n".into(),
            request
                .params
                .max_tokens
                .unwrap_or(DEFAULT_PREDICT)
                .to_string(),
        ];

        let mut prompt = String::new();
        if let Some(system) = &request.system_prompt {
            prompt.push_str(system);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&request.prompt);
        args.push("-p".into());
        args.push(prompt);

        if let Some(t) = request.params.temperature {
            args.push("--temp".into());
            args.push(t.to_string());
        }
        if let Some(p) = request.params.top_p {
            args.push("--top-p".into());
            args.push(p.to_string());
        }
        if let Some(k) = request.params.top_k {
            args.push("--top-k".into());
            args.push(k.to_string());
        }
        if let Some(c) = request.params.context_size {
            args.push("-c".into());
            args.push(c.to_string());
        }
        // Unrecognized fields pass through as long options
        for (key, value) in &request.params.extra {
            args.push(format!("--{}", key.replace('_', "-")));
            match value {
                serde_json::Value::String(s) => args.push(s.clone()),
                other => args.push(other.to_string()),
            }
        }
        args
    }
}

#[async_trait]
impl Backend for LlamaCppBackend {
    fn id(&self) -> &'static str {
        "llamacpp"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<BackendReply> {
        let catalog = ModelCatalog::load(&self.catalog_path)?;
        let entry = catalog.resolve(&request.model_id)?;
        let args = Self::build_args(request, &entry.path);

        tracing::debug!(
            "Running {} for model {} ({})",
            catalog.binary,
            request.model_id,
            entry.path.display()
        );

        let output = Command::new(&catalog.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PromptdeckError::BackendUnavailable(format!(
                    "llamacpp: binary '{}' not found",
                    catalog.binary
                )),
                _ => PromptdeckError::BackendUnavailable(
                    "llamacpp: failed to start inference binary".to_string(),
                ),
            })?;

        if !output.status.success() {
            // Keep the report terse; subprocess stderr can be verbose and
            // may reference local paths
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(PromptdeckError::ExecutionFailed(format!(
                "llamacpp: inference binary exited with status {}",
                code
            ))
            .into());
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(BackendReply {
            text,
            usage: TokenUsage::default(),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let catalog = ModelCatalog::load(&self.catalog_path)?;
        let mut models: Vec<ModelInfo> = catalog
            .models
            .iter()
            .map(|(id, entry)| ModelInfo {
                name: id.clone(),
                display_name: entry.name.clone().unwrap_or_else(|| id.clone()),
                context_window: entry.context_size.map(|c| c as usize),
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::GenerationParams;
    use tempfile::tempdir;

    fn request_with_params(params: GenerationParams) -> ExecutionRequest {
        ExecutionRequest {
            model_id: "tiny".to_string(),
            prompt: "hello".to_string(),
            system_prompt: Some("be brief".to_string()),
            params,
        }
    }

    #[test]
    fn test_build_args_includes_prompt_and_system() {
        let request = request_with_params(GenerationParams::default());
        let args = LlamaCppBackend::build_args(&request, &PathBuf::from("/m/t.gguf"));

        let prompt_index = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[prompt_index + 1], "be brief\n\nhello");
        assert!(args.contains(&"-m".to_string()));
        assert!(args.contains(&"/m/t.gguf".to_string()));
    }

    #[test]
    fn test_build_args_maps_parameters() {
        let params = GenerationParams {
            temperature: Some(0.2),
            top_p: Some(0.95),
            top_k: Some(50),
            max_tokens: Some(128),
            context_size: Some(4096),
            ..Default::default()
        };
        let args = LlamaCppBackend::build_args(&request_with_params(params), &PathBuf::from("m"));

        let pairs: Vec<(String, String)> = args
            .windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect();
        assert!(pairs.contains(&("--temp".to_string(), "0.2".to_string())));
        assert!(pairs.contains(&("--top-p".to_string(), "0.95".to_string())));
        assert!(pairs.contains(&("--top-k".to_string(), "50".to_string())));
        assert!(pairs.contains(&("-n".to_string(), "128".to_string())));
        assert!(pairs.contains(&("-c".to_string(), "4096".to_string())));
    }

    #[test]
    fn test_build_args_passes_extra_through() {
        let mut params = GenerationParams::default();
        params
            .extra
            .insert("repeat_penalty".to_string(), serde_json::json!(1.1));
        let args = LlamaCppBackend::build_args(&request_with_params(params), &PathBuf::from("m"));
        let index = args.iter().position(|a| a == "--repeat-penalty").unwrap();
        assert_eq!(args[index + 1], "1.1");
    }

    #[tokio::test]
    async fn test_execute_unknown_model() {
        let dir = tempdir().unwrap();
        let backend = LlamaCppBackend::new(dir.path().join("models.json"));
        let err = backend
            .execute(&request_with_params(GenerationParams::default()))
            .await
            .unwrap_err();
        let kind = err.downcast_ref::<PromptdeckError>().unwrap();
        assert!(matches!(kind, PromptdeckError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_missing_binary() {
        let dir = tempdir().unwrap();
        let catalog_path = dir.path().join("models.json");
        std::fs::write(
            &catalog_path,
            r#"{
                "binary": "definitely-not-a-real-binary-7f3a",
                "models": {"tiny": {"path": "/m/tiny.gguf"}}
            }"#,
        )
        .unwrap();

        let backend = LlamaCppBackend::new(catalog_path);
        let err = backend
            .execute(&request_with_params(GenerationParams::default()))
            .await
            .unwrap_err();
        let kind = err.downcast_ref::<PromptdeckError>().unwrap();
        assert!(matches!(kind, PromptdeckError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_list_models_from_catalog() {
        let dir = tempdir().unwrap();
        let catalog_path = dir.path().join("models.json");
        std::fs::write(
            &catalog_path,
            r#"{"models": {
                "b-model": {"path": "/m/b.gguf"},
                "a-model": {"path": "/m/a.gguf", "name": "Model A"}
            }}"#,
        )
        .unwrap();

        let backend = LlamaCppBackend::new(catalog_path);
        let models = backend.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "a-model");
        assert_eq!(models[0].display_name, "Model A");
        assert_eq!(models[1].display_name, "b-model");
    }
}
