//! Prompt template library
//!
//! Templates are YAML files keyed by a stable identifier: metadata (name,
//! id, category, variables), an optional system prompt, and a user prompt.
//! Bodies interpolate variables with `{{ name }}`. Rendering is a pure
//! function of the file content and the supplied variable map; parsed
//! templates are cached in-process until an explicit reload.

use crate::error::{PromptdeckError, Result};
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

/// A declared template variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    /// Variable name as referenced in `{{ name }}`
    pub name: String,
    /// Human description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the caller must supply a value (or a default must exist)
    #[serde(default)]
    pub required: bool,
    /// Value used when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Template metadata block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Display name
    pub name: String,
    /// Stable identifier; must match the file stem
    pub id: String,
    /// Optional grouping category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Human description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared variables
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
}

/// A parsed template file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Metadata block
    pub metadata: TemplateMetadata,
    /// Optional system prompt body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// User prompt body
    pub user_prompt: String,
}

/// Output of a successful render
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// Rendered system prompt, when the template declares one
    pub system_prompt: Option<String>,
    /// Rendered user prompt
    pub user_prompt: String,
    /// Metadata of the source template
    pub metadata: TemplateMetadata,
}

/// Summary row for `list`
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Grouping category
    pub category: Option<String>,
    /// Human description
    pub description: Option<String>,
    /// Number of declared variables
    pub variable_count: usize,
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid variable regex")
    })
}

/// File-backed template library with an in-process cache
pub struct TemplateLibrary {
    templates_dir: PathBuf,
    cache: RwLock<HashMap<String, Template>>,
}

impl TemplateLibrary {
    /// Create a library rooted at `templates_dir`. The directory does not
    /// need to exist yet; `create` will make it on demand.
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Directory the library reads from
    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    /// Load a template by identifier, reading `<templates_dir>/<id>.yaml`.
    ///
    /// Parsed results are cached; `reload` drops the cache.
    ///
    /// # Errors
    ///
    /// Returns `TemplateNotFound` when no such file exists and
    /// `TemplateInvalid` (with the parse-error location) when it cannot be
    /// parsed.
    pub fn load(&self, id: &str) -> Result<Template> {
        if let Some(cached) = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(id).cloned())
        {
            return Ok(cached);
        }

        let path = self.template_path(id);
        if !path.is_file() {
            return Err(PromptdeckError::TemplateNotFound(id.to_string()).into());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let template = parse_template(id, &text)?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(id.to_string(), template.clone());
        }
        Ok(template)
    }

    /// Drop the parse cache so the next `load` rereads from disk.
    pub fn reload(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// List template summaries, optionally filtered by category.
    pub fn list(&self, category: Option<&str>) -> Result<Vec<TemplateSummary>> {
        let mut summaries = Vec::new();
        let entries = match std::fs::read_dir(&self.templates_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(template) => {
                    if let Some(wanted) = category {
                        if template.metadata.category.as_deref() != Some(wanted) {
                            continue;
                        }
                    }
                    summaries.push(TemplateSummary {
                        id: template.metadata.id.clone(),
                        name: template.metadata.name.clone(),
                        category: template.metadata.category.clone(),
                        description: template.metadata.description.clone(),
                        variable_count: template.metadata.variables.len(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unparseable template {}: {}", id, e);
                }
            }
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    /// Render a template with the given variables.
    ///
    /// Caller variables are merged over per-variable defaults. Required
    /// variables are checked before any substitution; `MissingVariable`
    /// is raised even when the variable is never referenced in a body.
    ///
    /// # Errors
    ///
    /// `MissingVariable` for an absent required variable,
    /// `UnknownVariable` for a body reference that is neither declared
    /// nor provided.
    pub fn render(&self, id: &str, vars: &HashMap<String, String>) -> Result<RenderedPrompt> {
        let template = self.load(id)?;
        render_template(&template, vars)
    }

    /// Validate a template without rendering it.
    ///
    /// Returns `(true, [])` for a valid template, or `(false, errors)`
    /// listing every problem found. File-level failures (missing file,
    /// unparseable YAML) propagate as errors instead.
    pub fn validate(&self, id: &str) -> Result<(bool, Vec<String>)> {
        let template = self.load(id)?;
        let errors = validation_errors(id, &template);
        Ok((errors.is_empty(), errors))
    }

    /// Write a new template file into the library directory.
    ///
    /// # Errors
    ///
    /// Fails when the target already exists or the body is not a valid
    /// template document.
    pub fn create(&self, file_name: &str, body: &str) -> Result<PathBuf> {
        let stem = file_name.trim_end_matches(".yaml");
        // Body must parse before anything lands on disk
        parse_template(stem, body)?;

        std::fs::create_dir_all(&self.templates_dir)
            .context("Failed to create templates directory")?;
        let path = self.template_path(stem);
        if path.exists() {
            return Err(PromptdeckError::TemplateInvalid {
                id: stem.to_string(),
                message: "a template with this id already exists".to_string(),
            }
            .into());
        }
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Created template {}", path.display());
        Ok(path)
    }

    fn template_path(&self, id: &str) -> PathBuf {
        self.templates_dir.join(format!("{}.yaml", id))
    }
}

fn parse_template(id: &str, text: &str) -> Result<Template> {
    serde_yaml::from_str(text)
        .map_err(|e| {
            let location = e
                .location()
                .map(|l| format!(" at line {}, column {}", l.line(), l.column()))
                .unwrap_or_default();
            PromptdeckError::TemplateInvalid {
                id: id.to_string(),
                message: format!("{}{}", e, location),
            }
            .into()
        })
}

/// Render a parsed template against a variable map. Pure.
pub fn render_template(
    template: &Template,
    vars: &HashMap<String, String>,
) -> Result<RenderedPrompt> {
    // Required variables are checked up front, referenced or not
    for declared in &template.metadata.variables {
        if declared.required && !vars.contains_key(&declared.name) && declared.default.is_none() {
            return Err(PromptdeckError::MissingVariable(declared.name.clone()).into());
        }
    }

    let mut resolved: HashMap<&str, &str> = HashMap::new();
    for declared in &template.metadata.variables {
        if let Some(default) = &declared.default {
            resolved.insert(declared.name.as_str(), default.as_str());
        }
    }
    for (name, value) in vars {
        resolved.insert(name.as_str(), value.as_str());
    }

    let system_prompt = template
        .system_prompt
        .as_deref()
        .map(|body| substitute(body, &resolved))
        .transpose()?;
    let user_prompt = substitute(&template.user_prompt, &resolved)?;

    Ok(RenderedPrompt {
        system_prompt,
        user_prompt,
        metadata: template.metadata.clone(),
    })
}

fn substitute(body: &str, resolved: &HashMap<&str, &str>) -> Result<String> {
    let pattern = variable_pattern();
    let mut out = String::with_capacity(body.len());
    let mut last = 0;

    for captures in pattern.captures_iter(body) {
        let whole = captures.get(0).expect("capture 0 always present");
        let name = &captures[1];
        let value = resolved
            .get(name)
            .ok_or_else(|| PromptdeckError::UnknownVariable(name.to_string()))?;
        out.push_str(&body[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&body[last..]);
    Ok(out)
}

fn validation_errors(id: &str, template: &Template) -> Vec<String> {
    let mut errors = Vec::new();

    if template.metadata.id != id {
        errors.push(format!(
            "metadata id '{}' does not match file name '{}'",
            template.metadata.id, id
        ));
    }
    if template.metadata.name.trim().is_empty() {
        errors.push("metadata name is empty".to_string());
    }
    if template.user_prompt.trim().is_empty() {
        errors.push("user_prompt is empty".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for declared in &template.metadata.variables {
        if !seen.insert(declared.name.as_str()) {
            errors.push(format!("variable '{}' declared twice", declared.name));
        }
    }

    // Body references must be declared so a caller can discover them
    let declared: std::collections::HashSet<&str> = template
        .metadata
        .variables
        .iter()
        .map(|v| v.name.as_str())
        .collect();
    let mut bodies = vec![template.user_prompt.as_str()];
    if let Some(system) = &template.system_prompt {
        bodies.push(system.as_str());
    }
    for body in bodies {
        for captures in variable_pattern().captures_iter(body) {
            let name = &captures[1];
            if !declared.contains(name) {
                errors.push(format!("body references undeclared variable '{}'", name));
            }
        }
    }

    errors
}
