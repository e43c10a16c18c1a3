//! Model catalog for the local subprocess backend
//!
//! The catalog is a JSON file mapping model identifiers to model files on
//! disk, plus the inference binary to invoke. It lives next to the store
//! file so a deployment stays self-contained.

use crate::error::{PromptdeckError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_binary() -> String {
    "llama-cli".to_string()
}

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Path of the model file on disk
    pub path: PathBuf,
    /// Display name; the model id is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Context window the model was built for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u32>,
}

/// The on-disk model catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Inference binary to invoke
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Known models, keyed by identifier
    #[serde(default)]
    pub models: HashMap<String, CatalogEntry>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            models: HashMap::new(),
        }
    }
}

impl ModelCatalog {
    /// Load the catalog from `path`. A missing file yields an empty
    /// catalog; model resolution then fails with `ModelNotFound`.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let catalog: ModelCatalog = serde_json::from_str(&text).map_err(|e| {
                    PromptdeckError::InvalidConfig(format!("{}: {}", path.display(), e))
                })?;
                Ok(catalog)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No model catalog at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a model id to its entry.
    ///
    /// # Errors
    ///
    /// Returns `ModelNotFound` for ids absent from the catalog.
    pub fn resolve(&self, model_id: &str) -> Result<&CatalogEntry> {
        self.models.get(model_id).ok_or_else(|| {
            PromptdeckError::ModelNotFound(format!("llamacpp: {}", model_id)).into()
        })
    }
}
