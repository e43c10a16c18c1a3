//! Durable session store
//!
//! Sole owner of persistent state: sessions, messages, tags, and the
//! full-text projection all live in one SQLite file. Writes are serialized
//! per operation; a second writer that holds the file past the configured
//! deadline surfaces as `StoreBusy`. A file that fails its integrity check
//! at open time surfaces as `StoreCorrupt` and is never recreated here.

use crate::error::{PromptdeckError, Result};
use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod types;
pub use types::{ExportFormat, Role, Session, StoredMessage};

/// Minimum length accepted for session id prefix lookup
const MIN_ID_PREFIX: usize = 4;

/// Titles derived from the first user message are cut at this length
const AUTO_TITLE_MAX: usize = 48;

/// Deadline for opening the store file
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    model_id TEXT NOT NULL,
    model_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_duration_ms INTEGER NOT NULL DEFAULT 0,
    metadata TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    tokens INTEGER,
    duration_ms INTEGER,
    metadata TEXT,
    UNIQUE(session_id, seq)
);

CREATE TABLE IF NOT EXISTS tags (
    session_id TEXT NOT NULL REFERENCES sessions(id),
    tag TEXT NOT NULL,
    PRIMARY KEY (session_id, tag)
);

CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
    title,
    content=sessions,
    content_rowid=rowid,
    tokenize='unicode61'
);

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    content,
    content=messages,
    content_rowid=id,
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS sessions_ai AFTER INSERT ON sessions BEGIN
    INSERT INTO sessions_fts(rowid, title) VALUES (NEW.rowid, NEW.title);
END;

CREATE TRIGGER IF NOT EXISTS sessions_ad AFTER DELETE ON sessions BEGIN
    INSERT INTO sessions_fts(sessions_fts, rowid, title)
    VALUES('delete', OLD.rowid, OLD.title);
END;

CREATE TRIGGER IF NOT EXISTS sessions_au AFTER UPDATE OF title ON sessions BEGIN
    INSERT INTO sessions_fts(sessions_fts, rowid, title)
    VALUES('delete', OLD.rowid, OLD.title);
    INSERT INTO sessions_fts(rowid, title) VALUES (NEW.rowid, NEW.title);
END;

CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, content) VALUES (NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, content)
    VALUES('delete', OLD.id, OLD.content);
END;

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq);
CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);
"#;

/// Embedded relational store for sessions, messages, and tags
///
/// Single-writer, single-process. Connections are opened per operation,
/// the way the history database has always been accessed here; SQLite's
/// WAL mode keeps concurrent readers cheap.
#[derive(Debug)]
pub struct Store {
    db_path: PathBuf,
    write_timeout: Duration,
}

impl Store {
    /// Open (and if necessary create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreCorrupt` when the file exists but fails SQLite's
    /// quick integrity check; the caller must not recreate the file.
    pub fn open(path: impl Into<PathBuf>, write_timeout: Duration) -> Result<Self> {
        let db_path = path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create store parent directory")?;
            }
        }

        let store = Self {
            db_path,
            write_timeout,
        };
        store.init()?;
        Ok(store)
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path).map_err(map_store_err)?;
        conn.busy_timeout(OPEN_TIMEOUT).map_err(map_store_err)?;

        // Integrity is checked before the schema is touched; a damaged
        // file must never be silently rebuilt.
        let verdict: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(map_store_err)?;
        if verdict != "ok" {
            return Err(PromptdeckError::StoreCorrupt(format!(
                "{}: {}",
                self.db_path.display(),
                verdict
            ))
            .into());
        }

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(map_store_err)?;
        conn.execute_batch(SCHEMA).map_err(map_store_err)?;
        Ok(())
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(map_store_err)?;
        conn.busy_timeout(self.write_timeout).map_err(map_store_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(map_store_err)?;
        Ok(conn)
    }

    /// Create a session and return its identifier.
    ///
    /// The title may be omitted; it is then derived from the first user
    /// message added to the session.
    pub fn create_session(
        &self,
        model_id: &str,
        model_name: Option<&str>,
        title: Option<&str>,
    ) -> Result<String> {
        let conn = self.connect()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO sessions (id, title, model_id, model_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, title.unwrap_or(""), model_id, model_name, now],
        )
        .map_err(map_store_err)?;

        tracing::debug!("Created session {} for model {}", id, model_id);
        Ok(id)
    }

    /// Append a message to a session.
    ///
    /// Assigns the next sequence number, bumps the cached counters and the
    /// last-activity timestamp, and refreshes the full-text projection, all
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession` when the session does not exist.
    pub fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<usize>,
        duration_ms: Option<u64>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(map_store_err)?;

        let current: Option<(String, i64)> = tx
            .query_row(
                "SELECT title, message_count FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_store_err)?;
        let (title, message_count) = current
            .ok_or_else(|| PromptdeckError::UnknownSession(session_id.to_string()))?;

        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(map_store_err)?;

        let now = Utc::now().to_rfc3339();
        let metadata_text = metadata.map(|m| m.to_string());

        tx.execute(
            "INSERT INTO messages
                 (session_id, seq, role, content, created_at, tokens, duration_ms, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                seq,
                role.as_str(),
                content,
                now,
                tokens.map(|t| t as i64),
                duration_ms.map(|d| d as i64),
                metadata_text,
            ],
        )
        .map_err(map_store_err)?;
        let message_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions SET
                 message_count = message_count + 1,
                 total_tokens = total_tokens + ?2,
                 total_duration_ms = total_duration_ms + ?3,
                 updated_at = ?4
             WHERE id = ?1",
            params![
                session_id,
                tokens.unwrap_or(0) as i64,
                duration_ms.unwrap_or(0) as i64,
                now,
            ],
        )
        .map_err(map_store_err)?;

        // First user message names an untitled session
        if title.is_empty() && message_count == 0 && role == Role::User {
            let derived = derive_title(content);
            tx.execute(
                "UPDATE sessions SET title = ?2 WHERE id = ?1",
                params![session_id, derived],
            )
            .map_err(map_store_err)?;
        }

        tx.commit().map_err(map_store_err)?;
        Ok(message_id)
    }

    /// Fetch a session by exact identifier.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.connect()?;
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                row_to_session,
            )
            .optional()
            .map_err(map_store_err)?;
        Ok(session)
    }

    /// Resolve a full identifier or an unambiguous prefix to a session id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession` when nothing matches, the prefix is shorter
    /// than four characters, or more than one session matches.
    pub fn resolve_session_id(&self, id_or_prefix: &str) -> Result<String> {
        if self.get_session(id_or_prefix)?.is_some() {
            return Ok(id_or_prefix.to_string());
        }
        if id_or_prefix.len() < MIN_ID_PREFIX {
            return Err(PromptdeckError::UnknownSession(id_or_prefix.to_string()).into());
        }

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id FROM sessions WHERE id LIKE ?1 LIMIT 2")
            .map_err(map_store_err)?;
        let matches: Vec<String> = stmt
            .query_map(params![format!("{}%", id_or_prefix)], |row| row.get(0))
            .map_err(map_store_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(map_store_err)?;

        match matches.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(PromptdeckError::UnknownSession(id_or_prefix.to_string()).into()),
            _ => Err(PromptdeckError::UnknownSession(format!(
                "{} is ambiguous",
                id_or_prefix
            ))
            .into()),
        }
    }

    /// Messages of a session, ordered by sequence number ascending.
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, seq, role, content, created_at, tokens, duration_ms, metadata
                 FROM messages WHERE session_id = ?1 ORDER BY seq ASC",
            )
            .map_err(map_store_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_message)
            .map_err(map_store_err)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(map_store_err)?);
        }
        Ok(messages)
    }

    /// Sessions ordered by last activity, newest first.
    pub fn list_sessions(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sessions ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
                SESSION_COLUMNS
            ))
            .map_err(map_store_err)?;
        let rows = stmt
            .query_map(
                params![
                    limit.map(|l| l as i64).unwrap_or(-1),
                    offset.unwrap_or(0) as i64
                ],
                row_to_session,
            )
            .map_err(map_store_err)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(map_store_err)?);
        }
        Ok(sessions)
    }

    /// Sessions whose title or any message matches the query.
    ///
    /// Terms are case-folded and whitespace-split; any term may match.
    /// Double-quoted phrases must match as phrases.
    pub fn search(&self, query: &str) -> Result<Vec<Session>> {
        let Some(match_expr) = compile_match_expr(query) else {
            return Ok(Vec::new());
        };

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sessions s
                 WHERE s.rowid IN (SELECT rowid FROM sessions_fts WHERE sessions_fts MATCH ?1)
                    OR s.id IN (SELECT session_id FROM messages
                                WHERE id IN (SELECT rowid FROM messages_fts
                                             WHERE messages_fts MATCH ?1))
                 ORDER BY s.updated_at DESC",
                SESSION_COLUMNS
            ))
            .map_err(map_store_err)?;
        let rows = stmt
            .query_map(params![match_expr], row_to_session)
            .map_err(map_store_err)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(map_store_err)?);
        }
        Ok(sessions)
    }

    /// Attach a tag to a session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession` when the session does not exist.
    pub fn add_tag(&self, session_id: &str, tag: &str) -> Result<()> {
        let conn = self.connect()?;
        self.require_session(&conn, session_id)?;
        conn.execute(
            "INSERT OR IGNORE INTO tags (session_id, tag) VALUES (?1, ?2)",
            params![session_id, tag],
        )
        .map_err(map_store_err)?;
        Ok(())
    }

    /// Sessions carrying the given tag, newest activity first.
    pub fn get_sessions_by_tag(&self, tag: &str) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM sessions s
                 JOIN tags t ON t.session_id = s.id
                 WHERE t.tag = ?1
                 ORDER BY s.updated_at DESC",
                SESSION_COLUMNS
            ))
            .map_err(map_store_err)?;
        let rows = stmt
            .query_map(params![tag], row_to_session)
            .map_err(map_store_err)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(map_store_err)?);
        }
        Ok(sessions)
    }

    /// All distinct tags with the number of sessions carrying each.
    pub fn all_tags(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT tag, COUNT(*) FROM tags GROUP BY tag ORDER BY COUNT(*) DESC, tag ASC",
            )
            .map_err(map_store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(map_store_err)?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(row.map_err(map_store_err)?);
        }
        Ok(tags)
    }

    /// Merge metadata onto a session (used by workflow runs to record the
    /// final status).
    pub fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.connect()?;
        self.require_session(&conn, session_id)?;
        conn.execute(
            "UPDATE sessions SET metadata = ?2 WHERE id = ?1",
            params![session_id, metadata.to_string()],
        )
        .map_err(map_store_err)?;
        Ok(())
    }

    /// Delete a session and everything it owns: messages, tags, and
    /// full-text entries.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession` when the session does not exist.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(map_store_err)?;
        Self::delete_session_tx(&tx, session_id)?;
        tx.commit().map_err(map_store_err)?;
        tracing::debug!("Deleted session {}", session_id);
        Ok(())
    }

    fn delete_session_tx(tx: &rusqlite::Transaction<'_>, session_id: &str) -> Result<()> {
        // Explicit child deletes so the FTS sync triggers fire.
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(map_store_err)?;
        tx.execute("DELETE FROM tags WHERE session_id = ?1", params![session_id])
            .map_err(map_store_err)?;
        let deleted = tx
            .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(map_store_err)?;
        if deleted == 0 {
            return Err(PromptdeckError::UnknownSession(session_id.to_string()).into());
        }
        Ok(())
    }

    /// Render a session for humans or downstream tooling.
    pub fn export_session(&self, session_id: &str, format: ExportFormat) -> Result<Vec<u8>> {
        let session = self
            .get_session(session_id)?
            .ok_or_else(|| PromptdeckError::UnknownSession(session_id.to_string()))?;
        let messages = self.get_messages(session_id)?;

        match format {
            ExportFormat::Json => {
                let doc = serde_json::json!({
                    "session": session,
                    "messages": messages,
                });
                Ok(serde_json::to_vec_pretty(&doc).context("Failed to serialize export")?)
            }
            ExportFormat::Markdown => {
                let mut out = String::new();
                let title = if session.title.is_empty() {
                    "(untitled)"
                } else {
                    &session.title
                };
                out.push_str(&format!("# {}\n\n", title));
                out.push_str(&format!(
                    "- Model: {}\n- Created: {}\n- Messages: {}\n\n",
                    session.model_id,
                    session.created_at.to_rfc3339(),
                    session.message_count
                ));
                for message in &messages {
                    out.push_str(&format!("## {}\n\n{}\n\n", message.role, message.content));
                }
                Ok(out.into_bytes())
            }
        }
    }

    /// Delete sessions whose last activity is older than `days` days.
    /// Returns the number of sessions removed.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - ChronoDuration::days(i64::from(days))).to_rfc3339();

        let mut conn = self.connect()?;
        let tx = conn.transaction().map_err(map_store_err)?;

        let stale: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT id FROM sessions WHERE updated_at < ?1")
                .map_err(map_store_err)?;
            let rows = stmt
                .query_map(params![cutoff], |row| row.get(0))
                .map_err(map_store_err)?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(map_store_err)?);
            }
            ids
        };

        for id in &stale {
            Self::delete_session_tx(&tx, id)?;
        }
        tx.commit().map_err(map_store_err)?;

        if !stale.is_empty() {
            tracing::info!("Removed {} sessions older than {} days", stale.len(), days);
        }
        Ok(stale.len())
    }

    fn require_session(&self, conn: &Connection, session_id: &str) -> Result<()> {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_store_err)?;
        if exists.is_none() {
            return Err(PromptdeckError::UnknownSession(session_id.to_string()).into());
        }
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, title, model_id, model_name, created_at, updated_at, \
                               message_count, total_tokens, total_duration_ms, metadata";

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        model_id: row.get(2)?,
        model_name: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
        updated_at: parse_timestamp(&row.get::<_, String>(5)?),
        message_count: row.get::<_, i64>(6)? as usize,
        total_tokens: row.get::<_, i64>(7)? as usize,
        total_duration_ms: row.get::<_, i64>(8)? as u64,
        metadata: row
            .get::<_, Option<String>>(9)?
            .and_then(|text| serde_json::from_str(&text).ok()),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_text: String = row.get(3)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        seq: row.get::<_, i64>(2)? as u32,
        role: Role::parse_str(&role_text).unwrap_or(Role::System),
        content: row.get(4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?),
        tokens: row.get::<_, Option<i64>>(6)?.map(|t| t as usize),
        duration_ms: row.get::<_, Option<i64>>(7)?.map(|d| d as u64),
        metadata: row
            .get::<_, Option<String>>(8)?
            .and_then(|text| serde_json::from_str(&text).ok()),
    })
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn derive_title(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= AUTO_TITLE_MAX {
        flat
    } else {
        let cut: String = flat.chars().take(AUTO_TITLE_MAX - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Compile an operator query into an FTS5 MATCH expression.
///
/// Double-quoted spans become phrase queries; remaining text is
/// whitespace-split into terms. Terms are ORed so that any token overlap
/// matches. Returns `None` for a query with no usable terms.
fn compile_match_expr(query: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut rest = query;

    while let Some(start) = rest.find('"') {
        let before = &rest[..start];
        push_tokens(before, &mut parts);
        let after = &rest[start + 1..];
        match after.find('"') {
            Some(end) => {
                let phrase = after[..end].trim();
                if !phrase.is_empty() {
                    parts.push(format!("\"{}\"", phrase.replace('"', "\"\"")));
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unbalanced quote; treat the remainder as plain terms
                push_tokens(after, &mut parts);
                rest = "";
            }
        }
    }
    push_tokens(rest, &mut parts);

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" OR "))
    }
}

fn push_tokens(text: &str, parts: &mut Vec<String>) {
    for token in text.split_whitespace() {
        let folded = token.to_lowercase().replace('"', "");
        if !folded.is_empty() {
            parts.push(format!("\"{}\"", folded));
        }
    }
}

fn map_store_err(e: rusqlite::Error) -> anyhow::Error {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            PromptdeckError::StoreBusy(e.to_string()).into()
        }
        Some(rusqlite::ErrorCode::DatabaseCorrupt) | Some(rusqlite::ErrorCode::NotADatabase) => {
            PromptdeckError::StoreCorrupt(e.to_string()).into()
        }
        _ => anyhow::Error::new(e),
    }
}
