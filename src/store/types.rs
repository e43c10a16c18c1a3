//! Row types for the session store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Operator input
    User,
    /// Model output
    Assistant,
    /// Engine-generated content (workflow step records, system prompts)
    System,
}

impl Role {
    /// Stable textual form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse a role from its textual form
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque 128-bit identifier, textual (UUID v4)
    pub id: String,
    /// Display title; empty until the first user message supplies one
    pub title: String,
    /// Identifier of the model the session ran against
    pub model_id: String,
    /// Human-readable model name
    pub model_name: Option<String>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp; bumped on every message
    pub updated_at: DateTime<Utc>,
    /// Cached count of owned messages
    pub message_count: usize,
    /// Cached sum of message token counts
    pub total_tokens: usize,
    /// Cached sum of message durations, in milliseconds
    pub total_duration_ms: u64,
    /// Free-form metadata (workflow runs record their final status here)
    pub metadata: Option<serde_json::Value>,
}

/// One turn within a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Database row identifier
    pub id: i64,
    /// Owning session
    pub session_id: String,
    /// Dense, 1-based position within the session
    pub seq: u32,
    /// Message role
    pub role: Role,
    /// UTF-8 content, unbounded
    pub content: String,
    /// When the message was recorded
    pub created_at: DateTime<Utc>,
    /// Token count reported by the backend, when known
    pub tokens: Option<usize>,
    /// Wall-clock duration of the producing call, in milliseconds
    pub duration_ms: Option<u64>,
    /// Opaque JSON metadata blob
    pub metadata: Option<serde_json::Value>,
}

/// Export format for `export_session`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Raw object graph
    Json,
    /// Role-labeled blocks in sequence order
    Markdown,
}

impl ExportFormat {
    /// Parse a format name as given on the CLI
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// File extension for exports in this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}
