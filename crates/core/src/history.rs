//! Conversation History
//!
//! A session's turns outlive any single agent instance. They are kept in a
//! `HistoryStore` addressed by `session_id`, which supports appending a turn and
//! reading back every turn in order. `SessionHistory` binds a store to one
//! session and is the handle agent instances are given.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};
use tracing::debug;

/// Default number of turns a freshly constructed agent instance keeps.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error("History I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt history record at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode turn: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Durable, append-only storage of conversation turns keyed by session id.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Returns every stored turn for the session, oldest first.
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>, HistoryError>;

    /// Appends one turn to the end of the session's history.
    async fn append(&self, session_id: &str, turn: &Turn) -> Result<(), HistoryError>;
}

/// Drops the oldest turns so that at most `max` remain. Retained turns keep
/// their original order and content.
pub fn cap_history(turns: &mut Vec<Turn>, max: usize) {
    if turns.len() > max {
        let excess = turns.len() - max;
        turns.drain(..excess);
    }
}

/// Checks that a client supplied session id is safe to use as a storage key.
pub fn validate_session_id(session_id: &str) -> Result<(), HistoryError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(HistoryError::InvalidSessionId(session_id.to_string()))
    }
}

/// A history store bound to a single session.
#[derive(Clone)]
pub struct SessionHistory {
    session_id: String,
    store: Arc<dyn HistoryStore>,
}

impl SessionHistory {
    pub fn new(session_id: impl Into<String>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn load(&self) -> Result<Vec<Turn>, HistoryError> {
        self.store.load(&self.session_id).await
    }

    pub async fn append(&self, turn: &Turn) -> Result<(), HistoryError> {
        self.store.append(&self.session_id, turn).await
    }
}

/// In-process store, lost on restart.
#[derive(Default)]
pub struct MemoryHistoryStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>, HistoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turn: &Turn) -> Result<(), HistoryError> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(turn.clone());
        Ok(())
    }
}

/// Stores each session as a JSON-lines file named after its session id.
pub struct FileHistoryStore {
    root: PathBuf,
}

impl FileHistoryStore {
    /// Creates the store, making sure the root directory exists.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, HistoryError> {
        validate_session_id(session_id)?;
        Ok(self.root.join(format!("{session_id}.jsonl")))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>, HistoryError> {
        let path = self.path_for(session_id)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let turns = raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| HistoryError::Corrupt {
                    line: idx + 1,
                    source,
                })
            })
            .collect::<Result<Vec<Turn>, _>>()?;
        debug!(session_id, turns = turns.len(), "Loaded session history");
        Ok(turns)
    }

    async fn append(&self, session_id: &str, turn: &Turn) -> Result<(), HistoryError> {
        let path = self.path_for(session_id)?;
        let mut line = serde_json::to_string(turn).map_err(HistoryError::Encode)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
