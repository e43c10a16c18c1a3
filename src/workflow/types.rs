//! Workflow definition types
//!
//! Workflows are YAML documents: an identifier, global variables, and an
//! ordered list of steps. Each step carries a `type` tag selecting one of
//! the six step kinds, plus the shared scheduling fields (`depends_on`,
//! `condition`, `output_var`, `on_error`).

use serde::Deserialize;
use std::collections::HashMap;

/// A parsed workflow document
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: Option<String>,
    /// Initial variable scope
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    /// Ordered steps
    pub steps: Vec<WorkflowStep>,
}

/// One step of a workflow
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    /// Name, unique within the workflow
    pub name: String,
    /// The step body, selected by the `type` tag
    #[serde(flatten)]
    pub action: StepAction,
    /// Names of steps that must terminate before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Skip condition; for `conditional` steps this selects the branch
    #[serde(default)]
    pub condition: Option<String>,
    /// Scope variable receiving this step's output
    #[serde(default)]
    pub output_var: Option<String>,
    /// Failure handling policy
    #[serde(default)]
    pub on_error: OnErrorPolicy,
}

/// Type-specific step body
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Render variables into a prompt and call the gateway
    Prompt {
        /// Prompt body with `{{ name }}` references
        prompt: String,
        /// Model override; the engine default applies when absent
        #[serde(default)]
        model_id: Option<String>,
        /// Backend override; the engine default applies when absent
        #[serde(default)]
        backend_id: Option<String>,
        /// Optional system prompt, also interpolated
        #[serde(default)]
        system_prompt: Option<String>,
    },
    /// Render a library template, then call the gateway
    Template {
        /// Template identifier
        template_id: String,
        /// Template variables; values are interpolated against the scope
        #[serde(default)]
        vars: HashMap<String, String>,
    },
    /// Evaluate the step condition and run one of two branches
    Conditional {
        /// Steps run when the condition holds
        #[serde(default)]
        then_steps: Vec<WorkflowStep>,
        /// Steps run when it does not
        #[serde(default)]
        else_steps: Vec<WorkflowStep>,
    },
    /// Run a body once per element of a sequence in scope
    Loop {
        /// Name of a scope variable holding a sequence
        items_var: String,
        /// Scope name bound to the current element
        loop_var: String,
        /// Steps run per element
        body: Vec<WorkflowStep>,
    },
    /// Traverse a dotted path through a JSON-like value in scope
    Extract {
        /// Scope variable to read
        source_var: String,
        /// Dotted path, e.g. `items.0.title`
        path: String,
    },
    /// Cooperative delay, used for external rate limiting
    Sleep {
        /// Seconds to sleep
        duration_seconds: f64,
    },
}

impl StepAction {
    /// The `type` tag this body was parsed from
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prompt { .. } => "prompt",
            Self::Template { .. } => "template",
            Self::Conditional { .. } => "conditional",
            Self::Loop { .. } => "loop",
            Self::Extract { .. } => "extract",
            Self::Sleep { .. } => "sleep",
        }
    }
}

/// Per-step failure handling
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Abort the workflow (the default)
    #[default]
    Stop,
    /// Record the failure and proceed; dependents see the failure through
    /// variable absence
    Continue,
    /// Re-execute up to `attempts` times with a fixed backoff between
    /// tries, then abort
    Retry {
        /// Maximum number of re-executions after the initial attempt
        attempts: u32,
        /// Delay between tries, in seconds
        #[serde(default)]
        backoff_seconds: f64,
    },
}

/// Terminal status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Ran to completion
    Completed,
    /// Ran and failed
    Failed,
    /// Condition was false; body never ran
    Skipped,
}

/// Record of one executed (or skipped) step
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepRecord {
    /// Step name
    pub name: String,
    /// Terminal status
    pub status: StepStatus,
    /// Step output, when one was produced
    pub output: Option<serde_json::Value>,
    /// Failure description for failed steps
    pub error: Option<String>,
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No unhandled failure occurred
    Completed,
    /// An unhandled failure or cancellation ended the run
    Failed,
}

/// Auditable record of one workflow run
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowRunRecord {
    /// Workflow identifier
    pub workflow_id: String,
    /// Store session holding the per-step messages
    pub session_id: String,
    /// Terminal status
    pub status: RunStatus,
    /// Run start
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Run end
    pub finished_at: chrono::DateTime<chrono::Utc>,
    /// Per-step records, in execution order
    pub steps: Vec<StepRecord>,
}
