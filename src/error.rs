//! Error types for promptdeck
//!
//! Errors cross component boundaries as structured values: a kind plus a
//! human message. Backend exception text never reaches callers; the
//! provider gateway sanitizes transport and API failures into this
//! taxonomy before they propagate.

use thiserror::Error;

/// Main error type for promptdeck operations
///
/// Covers input validation, reference lookups, resource failures,
/// execution failures, and cooperative cancellation. Every variant
/// carries a human-readable message; messages never include backend
/// payloads or paths outside the configured base directory.
#[derive(Error, Debug)]
pub enum PromptdeckError {
    /// Configuration file rejected (unknown key, bad type, unreadable)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No template file with the given identifier
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Template file exists but failed to parse or validate
    #[error("Template '{id}' is invalid: {message}")]
    TemplateInvalid {
        /// Template identifier (file stem)
        id: String,
        /// Parse or validation failure, with location when available
        message: String,
    },

    /// A required template variable was not provided and has no default
    #[error("Missing required variable: {0}")]
    MissingVariable(String),

    /// A `{{ name }}` reference names a variable that is not in scope
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// Workflow definition rejected (parse failure, duplicate or unknown
    /// step names, dependency cycles)
    #[error("Invalid workflow: {0}")]
    WorkflowInvalid(String),

    /// Session identifier does not resolve to a stored session
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Batch job identifier has no checkpoint on disk
    #[error("Unknown batch job: {0}")]
    UnknownJob(String),

    /// Model identifier not known to the selected backend
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// A second writer holds the store; retry with backoff may succeed
    #[error("Store is busy: {0}")]
    StoreBusy(String),

    /// Corruption detected at store open; never silently recreate
    #[error("Store is corrupt: {0}")]
    StoreCorrupt(String),

    /// Transport-level failure reaching a backend, or unknown backend id
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend rejected the configured credentials
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A provider call or store open exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Backend accepted the request but reported a failure
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Generation parameters rejected during normalization
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Cooperative cancellation honored at an inter-step boundary
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Result type alias for promptdeck operations
///
/// Uses `anyhow::Error` as the error type so callers can attach context
/// while the taxonomy above stays downcastable at driver boundaries.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let error = PromptdeckError::InvalidConfig("unknown key 'colour'".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: unknown key 'colour'"
        );
    }

    #[test]
    fn test_template_invalid_display() {
        let error = PromptdeckError::TemplateInvalid {
            id: "summarize".to_string(),
            message: "missing user_prompt at line 4".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("summarize"));
        assert!(s.contains("line 4"));
    }

    #[test]
    fn test_missing_variable_display() {
        let error = PromptdeckError::MissingVariable("topic".to_string());
        assert_eq!(error.to_string(), "Missing required variable: topic");
    }

    #[test]
    fn test_unknown_session_display() {
        let error = PromptdeckError::UnknownSession("b0gus".to_string());
        assert_eq!(error.to_string(), "Unknown session: b0gus");
    }

    #[test]
    fn test_store_busy_display() {
        let error = PromptdeckError::StoreBusy("database is locked".to_string());
        assert_eq!(error.to_string(), "Store is busy: database is locked");
    }

    #[test]
    fn test_backend_unavailable_display() {
        let error = PromptdeckError::BackendUnavailable("ollama: connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Backend unavailable: ollama: connection failed"
        );
    }

    #[test]
    fn test_cancelled_display() {
        let error = PromptdeckError::Cancelled("batch job 01H".to_string());
        assert_eq!(error.to_string(), "Cancelled: batch job 01H");
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = PromptdeckError::Timeout("ollama: 300s".to_string()).into();
        let kind = err.downcast_ref::<PromptdeckError>().unwrap();
        assert!(matches!(kind, PromptdeckError::Timeout(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PromptdeckError>();
    }
}
