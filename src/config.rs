//! Configuration management for promptdeck
//!
//! Configuration is a single JSON mapping read at startup. Every key is
//! optional and has a default; keys outside the recognized set are rejected
//! with `InvalidConfig`. Paths are interpreted relative to the process
//! working directory unless absolute.

use crate::error::{PromptdeckError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default name of the configuration file searched in the working
/// directory and the user config directory.
pub const DEFAULT_CONFIG_FILE: &str = "promptdeck.json";

/// Main configuration structure for promptdeck
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Path to the session store file
    pub store_path: PathBuf,

    /// Directory holding prompt template YAML files
    pub templates_dir: PathBuf,

    /// Directory holding workflow YAML files
    pub workflows_dir: PathBuf,

    /// Directory where batch checkpoints are written
    pub checkpoints_dir: PathBuf,

    /// Directory for human-facing exports; never read back
    pub outputs_dir: PathBuf,

    /// Deadline for store write contention, in seconds
    pub store_write_timeout_seconds: u64,

    /// Per-call deadline for provider execution, in seconds
    pub provider_call_timeout_seconds: u64,

    /// Number of completed prompts between batch checkpoints
    pub batch_checkpoint_interval: usize,

    /// Sessions older than this are removed by `history cleanup` when no
    /// explicit age is given
    pub retention_days: u32,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./store.db")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("./prompt-templates")
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("./workflows")
}

fn default_checkpoints_dir() -> PathBuf {
    PathBuf::from("./batch_checkpoints")
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("./outputs")
}

fn default_store_write_timeout() -> u64 {
    30
}

fn default_provider_call_timeout() -> u64 {
    300
}

fn default_checkpoint_interval() -> usize {
    5
}

fn default_retention_days() -> u32 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            templates_dir: default_templates_dir(),
            workflows_dir: default_workflows_dir(),
            checkpoints_dir: default_checkpoints_dir(),
            outputs_dir: default_outputs_dir(),
            store_write_timeout_seconds: default_store_write_timeout(),
            provider_call_timeout_seconds: default_provider_call_timeout(),
            batch_checkpoint_interval: default_checkpoint_interval(),
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, or from the default
    /// locations when `path` is `None`.
    ///
    /// Lookup order for the default: `./promptdeck.json`, then
    /// `<user config dir>/promptdeck.json`. When no file exists the
    /// built-in defaults apply.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the file cannot be read or parsed, or
    /// when it carries unrecognized keys. An explicitly named file that
    /// does not exist is an error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    PromptdeckError::InvalidConfig(format!("{}: {}", p.display(), e))
                })?;
                Self::from_json(&text)
            }
            None => {
                if let Some(found) = Self::default_config_path() {
                    let text = std::fs::read_to_string(&found).map_err(|e| {
                        PromptdeckError::InvalidConfig(format!("{}: {}", found.display(), e))
                    })?;
                    Self::from_json(&text)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed JSON or unknown keys.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)
            .map_err(|e| PromptdeckError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when a timeout or interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.store_write_timeout_seconds == 0 {
            return Err(PromptdeckError::InvalidConfig(
                "store_write_timeout_seconds must be positive".to_string(),
            )
            .into());
        }
        if self.provider_call_timeout_seconds == 0 {
            return Err(PromptdeckError::InvalidConfig(
                "provider_call_timeout_seconds must be positive".to_string(),
            )
            .into());
        }
        if self.batch_checkpoint_interval == 0 {
            return Err(PromptdeckError::InvalidConfig(
                "batch_checkpoint_interval must be positive".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Path of the first default config file that exists, if any.
    fn default_config_path() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        let proj = ProjectDirs::from("com", "promptdeck", "promptdeck")?;
        let candidate = proj.config_dir().join(DEFAULT_CONFIG_FILE);
        candidate.is_file().then_some(candidate)
    }

    /// Path of the llamacpp model catalog, derived from the store location
    /// (the catalog lives next to the store file).
    pub fn model_catalog_path(&self) -> PathBuf {
        match self.store_path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("models.json"),
            Some(parent) => parent.join("models.json"),
            None => PathBuf::from("models.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store_path, PathBuf::from("./store.db"));
        assert_eq!(config.templates_dir, PathBuf::from("./prompt-templates"));
        assert_eq!(config.workflows_dir, PathBuf::from("./workflows"));
        assert_eq!(config.checkpoints_dir, PathBuf::from("./batch_checkpoints"));
        assert_eq!(config.outputs_dir, PathBuf::from("./outputs"));
        assert_eq!(config.store_write_timeout_seconds, 30);
        assert_eq!(config.provider_call_timeout_seconds, 300);
        assert_eq!(config.batch_checkpoint_interval, 5);
        assert_eq!(config.retention_days, 90);
    }

    #[test]
    fn test_from_json_partial() {
        let config = Config::from_json(r#"{"batch_checkpoint_interval": 10}"#).unwrap();
        assert_eq!(config.batch_checkpoint_interval, 10);
        // Unspecified keys keep their defaults
        assert_eq!(config.retention_days, 90);
    }

    #[test]
    fn test_from_json_rejects_unknown_keys() {
        let result = Config::from_json(r#"{"store_path": "/tmp/s.db", "colour_scheme": "dark"}"#);
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Invalid configuration"), "{}", message);
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(Config::from_json("{not json").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let result = Config::from_json(r#"{"batch_checkpoint_interval": 0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        assert!(Config::from_json(r#"{"store_write_timeout_seconds": 0}"#).is_err());
        assert!(Config::from_json(r#"{"provider_call_timeout_seconds": 0}"#).is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/promptdeck.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_model_catalog_path_next_to_store() {
        let config = Config::from_json(r#"{"store_path": "/data/deck/store.db"}"#).unwrap();
        assert_eq!(
            config.model_catalog_path(),
            PathBuf::from("/data/deck/models.json")
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.store_path, config.store_path);
        assert_eq!(parsed.retention_days, config.retention_days);
    }
}
