//! Session persistence - append-only chat transcripts
//!
//! All sessions live in one JSON document (`{ "sessions": [...] }`) at a
//! well-known path. Every save is a read-modify-write of the whole file,
//! executed under a process-wide critical section and written via
//! temp-file-then-rename so a crash mid-write never truncates the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Structured session store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persisted document exists but cannot be understood. Reported
    /// distinctly from "no sessions yet".
    #[error("session store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("failed to write session store: {0}")]
    Write(String),

    #[error("failed to read session store: {0}")]
    Read(String),
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One transcript entry. Never mutated, never reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message (transcripts are append-only)
    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        let now = Utc::now();
        self.messages.push(Message {
            role,
            text: text.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    /// Short label for history listings: first user message, truncated
    pub fn title(&self) -> String {
        let first = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
            .unwrap_or("(empty session)");
        let mut title: String = first.chars().take(50).collect();
        if first.chars().count() > 50 {
            title.push_str("...");
        }
        title
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry returned by `load_all`
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// On-disk document shape
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    sessions: Vec<Session>,
}

/// Durable access to the single-document session log.
///
/// Clones share one write lock, so concurrent `save` calls from anywhere in
/// the process serialize instead of clobbering each other's read-modify-write
/// cycles.
#[derive(Clone)]
pub struct SessionStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List all sessions, newest first. An absent file is an empty store;
    /// an unreadable or malformed file is an error, never silently empty.
    pub fn load_all(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let file = self.read_file_strict()?;
        let mut summaries: Vec<SessionSummary> = file
            .sessions
            .iter()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                title: s.title(),
                message_count: s.messages.len(),
                updated_at: s.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Load one session by id
    pub fn load_one(&self, id: &str) -> Result<Session, StoreError> {
        let file = self.read_file_strict()?;
        file.sessions
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Persist a session: replace the entry with the same id, or append.
    ///
    /// The whole read-modify-write cycle holds the store lock, and the new
    /// document is staged in a temp file and renamed into place, so a crash
    /// mid-write leaves the previous contents intact.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.save_impl(session, false)
    }

    fn save_impl(&self, session: &Session, crash_before_rename: bool) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().expect("store lock poisoned");

        // During save, unreadable existing content degrades to an empty
        // store rather than blocking the write
        let mut file = self.read_file_lenient();

        match file.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => *slot = session.clone(),
            None => file.sessions.push(session.clone()),
        }

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| StoreError::Write(e.to_string()))?;

        let tmp = NamedTempFile::new_in(&dir).map_err(|e| StoreError::Write(e.to_string()))?;
        fs::write(tmp.path(), &content).map_err(|e| StoreError::Write(e.to_string()))?;

        if crash_before_rename {
            // Test hook: simulate dying between staging and rename
            return Err(StoreError::Write("simulated crash before rename".into()));
        }

        tmp.persist(&self.path)
            .map_err(|e| StoreError::Write(e.to_string()))?;
        debug!(path = %self.path.display(), id = %session.id, "session saved");
        Ok(())
    }

    /// Read for loads: corrupt content is an error
    fn read_file_strict(&self) -> Result<SessionFile, StoreError> {
        if !self.path.exists() {
            return Ok(SessionFile::default());
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| StoreError::Read(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Read for saves: absent or corrupt content is an empty store
    fn read_file_lenient(&self) -> SessionFile {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }
}
