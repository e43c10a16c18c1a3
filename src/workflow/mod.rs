//! Workflow engine
//!
//! Executes a declarative DAG of steps with variable scoping, conditional
//! skips, bounded loops, and per-step error handling. Cycle detection runs
//! before any step; steps then execute in a topological order consistent
//! with `depends_on`. Every run is persisted as a store session tagged
//! `workflow:<id>`, one system message per step, with the final status in
//! the session metadata.

use crate::error::{PromptdeckError, Result};
use crate::providers::{GenerationParams, ProviderGateway};
use crate::store::{Role, Store};
use crate::templates::TemplateLibrary;
use anyhow::Context;
use chrono::Utc;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod condition;
pub mod types;

pub use types::{
    OnErrorPolicy, RunStatus, StepAction, StepRecord, StepStatus, WorkflowDefinition,
    WorkflowRunRecord, WorkflowStep,
};

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid variable regex")
    })
}

/// Parse a workflow document from YAML text.
///
/// # Errors
///
/// Returns `WorkflowInvalid` with the parse location on malformed input.
pub fn parse_workflow(text: &str) -> Result<WorkflowDefinition> {
    serde_yaml::from_str(text).map_err(|e| {
        let location = e
            .location()
            .map(|l| format!(" at line {}, column {}", l.line(), l.column()))
            .unwrap_or_default();
        PromptdeckError::WorkflowInvalid(format!("{}{}", e, location)).into()
    })
}

/// Load a workflow document from a file.
pub fn load_workflow(path: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PromptdeckError::WorkflowInvalid(format!("{}: {}", path.display(), e))
    })?;
    parse_workflow(&text)
}

/// Enumerate the workflow files in a directory as `(id, name, path)`.
pub fn list_workflows(dir: &Path) -> Result<Vec<(String, String, PathBuf)>> {
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        match load_workflow(&path) {
            Ok(definition) => found.push((definition.id, definition.name, path)),
            Err(e) => tracing::warn!("Skipping unparseable workflow {}: {}", path.display(), e),
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// How a step's disposition affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFlow {
    Continue,
    Abort,
}

/// What one action attempt produced
struct ActionOutput {
    value: Option<Value>,
    tokens: Option<usize>,
    duration_ms: Option<u64>,
}

impl ActionOutput {
    fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            tokens: None,
            duration_ms: None,
        }
    }

    fn none() -> Self {
        Self {
            value: None,
            tokens: None,
            duration_ms: None,
        }
    }
}

/// Mutable state of one run
struct RunState {
    scope: HashMap<String, Value>,
    records: Vec<StepRecord>,
    session_id: String,
    cancel: CancellationToken,
}

/// Driver for workflow execution
pub struct WorkflowEngine {
    gateway: Arc<ProviderGateway>,
    templates: Arc<TemplateLibrary>,
    store: Arc<Store>,
    default_backend: String,
    default_model: String,
}

impl WorkflowEngine {
    /// Create an engine. `default_backend` / `default_model` apply to
    /// prompt and template steps that carry no override.
    pub fn new(
        gateway: Arc<ProviderGateway>,
        templates: Arc<TemplateLibrary>,
        store: Arc<Store>,
        default_backend: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            templates,
            store,
            default_backend: default_backend.into(),
            default_model: default_model.into(),
        }
    }

    /// Structurally validate a workflow: unique step names, resolvable
    /// dependencies, well-formed step bodies, and an acyclic graph.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowInvalid` describing the first problem found.
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<()> {
        if definition.id.trim().is_empty() {
            return Err(invalid("workflow id is empty"));
        }
        if definition.steps.is_empty() {
            return Err(invalid("workflow has no steps"));
        }

        let mut names = HashSet::new();
        for step in &definition.steps {
            if !names.insert(step.name.as_str()) {
                return Err(invalid(&format!("duplicate step name '{}'", step.name)));
            }
        }
        for step in &definition.steps {
            for dependency in &step.depends_on {
                if dependency == &step.name {
                    return Err(invalid(&format!(
                        "step '{}' depends on itself",
                        step.name
                    )));
                }
                if !names.contains(dependency.as_str()) {
                    return Err(invalid(&format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name, dependency
                    )));
                }
            }
            validate_step_body(step, true)?;
        }

        topological_order(definition)?;
        Ok(())
    }

    /// Execute a workflow to its terminal status.
    ///
    /// `extra_vars` are merged over the workflow's `variables` block.
    /// Cancellation takes effect at step boundaries (and interrupts
    /// `sleep` steps); a cancelled run is `failed`.
    ///
    /// # Errors
    ///
    /// `WorkflowInvalid` before any step runs when the definition is
    /// malformed; store failures propagate. Step failures do not surface
    /// here; they are recorded in the returned run record.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        extra_vars: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRunRecord> {
        self.validate(definition)?;
        let order = topological_order(definition)?;
        let started_at = Utc::now();

        let session_id = self.store.create_session(
            &self.default_model,
            None,
            Some(&format!("Workflow: {}", definition.name)),
        )?;
        self.store
            .add_tag(&session_id, &format!("workflow:{}", definition.id))?;

        let mut scope = definition.variables.clone();
        scope.extend(extra_vars);

        let mut state = RunState {
            scope,
            records: Vec::new(),
            session_id: session_id.clone(),
            cancel: cancel.clone(),
        };

        let mut failed = false;
        for &index in &order {
            if state.cancel.is_cancelled() {
                tracing::warn!("Workflow {} cancelled", definition.id);
                failed = true;
                break;
            }
            let step = &definition.steps[index];
            let (flow, _) = self.run_step(step, &mut state).await?;
            if flow == StepFlow::Abort {
                failed = true;
                break;
            }
        }

        let status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let finished_at = Utc::now();

        self.store.update_session_metadata(
            &session_id,
            &serde_json::json!({
                "workflow_id": definition.id,
                "status": status,
                "started_at": started_at.to_rfc3339(),
                "finished_at": finished_at.to_rfc3339(),
            }),
        )?;

        tracing::info!(
            "Workflow {} finished: {:?} ({} step records)",
            definition.id,
            status,
            state.records.len()
        );

        Ok(WorkflowRunRecord {
            workflow_id: definition.id.clone(),
            session_id,
            status,
            started_at,
            finished_at,
            steps: state.records,
        })
    }

    /// Run one step through its condition, retries, and disposition.
    /// Returns the control flow and the step's bound output.
    async fn run_step(
        &self,
        step: &WorkflowStep,
        state: &mut RunState,
    ) -> Result<(StepFlow, Option<Value>)> {
        // A false condition skips every step type except `conditional`,
        // where the condition selects the branch instead
        if !matches!(step.action, StepAction::Conditional { .. }) {
            if let Some(expression) = &step.condition {
                match condition::evaluate(expression, &state.scope) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("Step {} skipped by condition", step.name);
                        return self
                            .record_step(step, state, StepStatus::Skipped, None, None, None, None)
                            .map(|_| (StepFlow::Continue, None));
                    }
                    Err(e) => return self.dispose_failure(step, state, e).await,
                }
            }
        }

        let mut attempt: u32 = 0;
        let outcome = loop {
            match self.attempt_action(step, state).await {
                Ok(output) => break Ok(output),
                Err(e) => {
                    if is_cancelled(&e) {
                        break Err(e);
                    }
                    if let OnErrorPolicy::Retry {
                        attempts,
                        backoff_seconds,
                    } = &step.on_error
                    {
                        if attempt < *attempts {
                            attempt += 1;
                            tracing::warn!(
                                "Step {} failed (attempt {}/{}), retrying: {}",
                                step.name,
                                attempt,
                                attempts,
                                e
                            );
                            tokio::time::sleep(Duration::from_secs_f64(
                                backoff_seconds.max(0.0),
                            ))
                            .await;
                            continue;
                        }
                    }
                    break Err(e);
                }
            }
        };

        match outcome {
            Ok(output) => {
                let value = output.value.clone();
                if let (Some(var), Some(produced)) = (&step.output_var, &output.value) {
                    state.scope.insert(var.clone(), produced.clone());
                }
                self.record_step(
                    step,
                    state,
                    StepStatus::Completed,
                    output.value,
                    None,
                    output.tokens,
                    output.duration_ms,
                )?;
                Ok((StepFlow::Continue, value))
            }
            Err(e) => self.dispose_failure(step, state, e).await,
        }
    }

    /// Record a failed step and decide whether the run continues.
    async fn dispose_failure(
        &self,
        step: &WorkflowStep,
        state: &mut RunState,
        error: anyhow::Error,
    ) -> Result<(StepFlow, Option<Value>)> {
        let cancelled = is_cancelled(&error);
        self.record_step(
            step,
            state,
            StepStatus::Failed,
            None,
            Some(error.to_string()),
            None,
            None,
        )?;

        if cancelled {
            return Ok((StepFlow::Abort, None));
        }
        match step.on_error {
            OnErrorPolicy::Continue => {
                tracing::warn!("Step {} failed, continuing: {}", step.name, error);
                Ok((StepFlow::Continue, None))
            }
            // Stop, and Retry once its budget is spent, abort the run
            _ => {
                tracing::error!("Step {} failed, aborting workflow: {}", step.name, error);
                Ok((StepFlow::Abort, None))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_step(
        &self,
        step: &WorkflowStep,
        state: &mut RunState,
        status: StepStatus,
        output: Option<Value>,
        error: Option<String>,
        tokens: Option<usize>,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        let content = match (&status, &output, &error) {
            (StepStatus::Failed, _, Some(message)) => message.clone(),
            (_, Some(Value::String(text)), _) => text.clone(),
            (_, Some(value), _) => value.to_string(),
            _ => String::new(),
        };
        let metadata = serde_json::json!({
            "step": step.name,
            "status": status,
        });
        self.store
            .add_message(
                &state.session_id,
                Role::System,
                &content,
                tokens,
                duration_ms,
                Some(&metadata),
            )
            .context("Failed to persist step record")?;

        state.records.push(StepRecord {
            name: step.name.clone(),
            status,
            output,
            error,
        });
        Ok(())
    }

    /// Execute a step's action once. Nested sequences record their own
    /// steps; an aborting nested step surfaces as this action's failure.
    async fn attempt_action(
        &self,
        step: &WorkflowStep,
        state: &mut RunState,
    ) -> Result<ActionOutput> {
        match &step.action {
            StepAction::Prompt {
                prompt,
                model_id,
                backend_id,
                system_prompt,
            } => {
                let prompt = interpolate(prompt, &state.scope)?;
                let system = system_prompt
                    .as_deref()
                    .map(|text| interpolate(text, &state.scope))
                    .transpose()?;
                let backend = backend_id.as_deref().unwrap_or(&self.default_backend);
                let model = model_id.as_deref().unwrap_or(&self.default_model);

                let output = self
                    .gateway
                    .execute(
                        backend,
                        model,
                        &prompt,
                        system.as_deref(),
                        GenerationParams::default(),
                    )
                    .await?;
                Ok(ActionOutput {
                    value: Some(Value::String(output.text)),
                    tokens: Some(output.usage.total_tokens),
                    duration_ms: Some(output.duration.as_millis() as u64),
                })
            }
            StepAction::Template { template_id, vars } => {
                let mut rendered_vars = HashMap::new();
                for (name, value) in vars {
                    rendered_vars.insert(name.clone(), interpolate(value, &state.scope)?);
                }
                let rendered = self.templates.render(template_id, &rendered_vars)?;

                let output = self
                    .gateway
                    .execute(
                        &self.default_backend,
                        &self.default_model,
                        &rendered.user_prompt,
                        rendered.system_prompt.as_deref(),
                        GenerationParams::default(),
                    )
                    .await?;
                Ok(ActionOutput {
                    value: Some(Value::String(output.text)),
                    tokens: Some(output.usage.total_tokens),
                    duration_ms: Some(output.duration.as_millis() as u64),
                })
            }
            StepAction::Conditional {
                then_steps,
                else_steps,
            } => {
                let expression = step.condition.as_deref().ok_or_else(|| {
                    PromptdeckError::WorkflowInvalid(format!(
                        "conditional step '{}' has no condition",
                        step.name
                    ))
                })?;
                let branch = if condition::evaluate(expression, &state.scope)? {
                    then_steps
                } else {
                    else_steps
                };
                let (branch_output, flow) = self.run_sequence(branch, state).await?;
                if flow == StepFlow::Abort {
                    return Err(PromptdeckError::ExecutionFailed(format!(
                        "branch of '{}' aborted",
                        step.name
                    ))
                    .into());
                }
                Ok(ActionOutput {
                    value: branch_output,
                    tokens: None,
                    duration_ms: None,
                })
            }
            StepAction::Loop {
                items_var,
                loop_var,
                body,
            } => {
                let items = state
                    .scope
                    .get(items_var)
                    .cloned()
                    .ok_or_else(|| PromptdeckError::UnknownVariable(items_var.clone()))?;
                let Value::Array(items) = items else {
                    return Err(PromptdeckError::ExecutionFailed(format!(
                        "'{}' is not a sequence",
                        items_var
                    ))
                    .into());
                };

                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    state.scope.insert(loop_var.clone(), item);
                    let result = self.run_sequence(body, state).await;
                    match result {
                        Ok((iteration_output, StepFlow::Continue)) => {
                            outputs.push(iteration_output.unwrap_or(Value::Null));
                        }
                        Ok((_, StepFlow::Abort)) => {
                            state.scope.remove(loop_var);
                            return Err(PromptdeckError::ExecutionFailed(format!(
                                "loop body of '{}' aborted",
                                step.name
                            ))
                            .into());
                        }
                        Err(e) => {
                            state.scope.remove(loop_var);
                            return Err(e);
                        }
                    }
                }
                // Iteration binding does not outlive the loop
                state.scope.remove(loop_var);
                Ok(ActionOutput::value(Value::Array(outputs)))
            }
            StepAction::Extract { source_var, path } => {
                let source = state
                    .scope
                    .get(source_var)
                    .ok_or_else(|| PromptdeckError::UnknownVariable(source_var.clone()))?;
                let value = traverse_path(source, path).ok_or_else(|| {
                    PromptdeckError::ExecutionFailed(format!(
                        "path '{}' not found in '{}'",
                        path, source_var
                    ))
                })?;
                Ok(ActionOutput::value(value))
            }
            StepAction::Sleep { duration_seconds } => {
                let duration = Duration::from_secs_f64(duration_seconds.max(0.0));
                tokio::select! {
                    _ = state.cancel.cancelled() => {
                        Err(PromptdeckError::Cancelled(format!("sleep step '{}'", step.name)).into())
                    }
                    _ = tokio::time::sleep(duration) => Ok(ActionOutput::none()),
                }
            }
        }
    }

    /// Run nested steps in list order, returning the final output and
    /// whether the sequence aborted.
    fn run_sequence<'a>(
        &'a self,
        steps: &'a [WorkflowStep],
        state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<(Option<Value>, StepFlow)>> {
        Box::pin(async move {
            let mut last_output = None;
            for step in steps {
                if state.cancel.is_cancelled() {
                    return Ok((last_output, StepFlow::Abort));
                }
                let (flow, value) = self.run_step(step, state).await?;
                if flow == StepFlow::Abort {
                    return Ok((last_output, StepFlow::Abort));
                }
                if value.is_some() {
                    last_output = value;
                }
            }
            Ok((last_output, StepFlow::Continue))
        })
    }
}

fn invalid(message: &str) -> anyhow::Error {
    PromptdeckError::WorkflowInvalid(message.to_string()).into()
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<PromptdeckError>(),
        Some(PromptdeckError::Cancelled(_))
    )
}

/// Substitute `{{ name }}` references from the scope.
///
/// # Errors
///
/// Returns `UnknownVariable` for references absent from the scope.
fn interpolate(text: &str, scope: &HashMap<String, Value>) -> Result<String> {
    let pattern = variable_pattern();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for captures in pattern.captures_iter(text) {
        let whole = captures.get(0).expect("capture 0 always present");
        let name = &captures[1];
        let value = scope
            .get(name)
            .ok_or_else(|| PromptdeckError::UnknownVariable(name.to_string()))?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&value_to_text(value));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Traverse a dotted path through objects (by key) and arrays (by index).
fn traverse_path(source: &Value, path: &str) -> Option<Value> {
    let mut current = source;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn validate_step_body(step: &WorkflowStep, top_level: bool) -> Result<()> {
    if step.name.trim().is_empty() {
        return Err(invalid("a step has an empty name"));
    }
    if !top_level && !step.depends_on.is_empty() {
        return Err(invalid(&format!(
            "nested step '{}' must not declare depends_on",
            step.name
        )));
    }

    match &step.action {
        StepAction::Prompt { prompt, .. } => {
            if prompt.trim().is_empty() {
                return Err(invalid(&format!("step '{}' has an empty prompt", step.name)));
            }
        }
        StepAction::Template { template_id, .. } => {
            if template_id.trim().is_empty() {
                return Err(invalid(&format!(
                    "step '{}' has an empty template_id",
                    step.name
                )));
            }
        }
        StepAction::Conditional {
            then_steps,
            else_steps,
        } => {
            if step.condition.is_none() {
                return Err(invalid(&format!(
                    "conditional step '{}' has no condition",
                    step.name
                )));
            }
            validate_nested(then_steps)?;
            validate_nested(else_steps)?;
        }
        StepAction::Loop { body, .. } => {
            if body.is_empty() {
                return Err(invalid(&format!(
                    "loop step '{}' has an empty body",
                    step.name
                )));
            }
            validate_nested(body)?;
        }
        StepAction::Extract { path, .. } => {
            if path.trim().is_empty() {
                return Err(invalid(&format!("step '{}' has an empty path", step.name)));
            }
        }
        StepAction::Sleep { duration_seconds } => {
            if *duration_seconds < 0.0 || !duration_seconds.is_finite() {
                return Err(invalid(&format!(
                    "step '{}' has an invalid duration",
                    step.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_nested(steps: &[WorkflowStep]) -> Result<()> {
    let mut names = HashSet::new();
    for step in steps {
        if !names.insert(step.name.as_str()) {
            return Err(invalid(&format!(
                "duplicate nested step name '{}'",
                step.name
            )));
        }
        validate_step_body(step, false)?;
    }
    Ok(())
}

/// Kahn's algorithm over the top-level steps, preferring list order among
/// ready steps so runs are deterministic.
///
/// # Errors
///
/// Returns `WorkflowInvalid` naming the steps involved in a cycle.
fn topological_order(definition: &WorkflowDefinition) -> Result<Vec<usize>> {
    let count = definition.steps.len();
    let index_of: HashMap<&str, usize> = definition
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| (step.name.as_str(), index))
        .collect();

    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (index, step) in definition.steps.iter().enumerate() {
        for dependency in &step.depends_on {
            let Some(&from) = index_of.get(dependency.as_str()) else {
                return Err(invalid(&format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dependency
                )));
            };
            in_degree[index] += 1;
            dependents[from].push(index);
        }
    }

    let mut order = Vec::with_capacity(count);
    let mut done = vec![false; count];
    while order.len() < count {
        let Some(next) = (0..count).find(|&i| !done[i] && in_degree[i] == 0) else {
            let stuck: Vec<&str> = (0..count)
                .filter(|&i| !done[i])
                .map(|i| definition.steps[i].name.as_str())
                .collect();
            return Err(invalid(&format!(
                "dependency cycle involving: {}",
                stuck.join(", ")
            )));
        };
        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
        }
    }
    Ok(order)
}
