//! Conversation id persistence
//!
//! The backend keys its checkpointer by conversation id, so the client must
//! keep the same id across turns (and restarts) until the user starts a new
//! chat. Stores are pluggable; the file store survives process restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{GatewayError, Result};

/// Storage key for the conversation id
pub const CONVERSATION_ID_KEY: &str = "story_conversation_id";

/// Fresh conversation id (UUID v4).
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trait for persisting the client's conversation id
pub trait ConversationStore: Send + Sync {
    /// Load the stored id, if any
    fn load(&self) -> Result<Option<String>>;

    /// Store `id`, replacing any previous one
    fn save(&self, id: &str) -> Result<()>;

    /// Existing id, or a new one which is stored before returning
    fn get_or_create(&self) -> Result<String> {
        if let Some(id) = self.load()?.filter(|id| !id.is_empty()) {
            return Ok(id);
        }
        let id = new_conversation_id();
        self.save(&id)?;
        Ok(id)
    }

    /// Start a new conversation: store and return a fresh id
    fn reset(&self) -> Result<String> {
        let id = new_conversation_id();
        self.save(&id)?;
        Ok(id)
    }
}

/// In-memory store (tests, one-shot sessions)
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    id: Mutex<Option<String>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryConversationStore {
    fn load(&self) -> Result<Option<String>> {
        let guard = self
            .id
            .lock()
            .map_err(|_| GatewayError::InvalidState("conversation store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, id: &str) -> Result<()> {
        let mut guard = self
            .id
            .lock()
            .map_err(|_| GatewayError::InvalidState("conversation store lock poisoned".into()))?;
        *guard = Some(id.to_string());
        Ok(())
    }
}

/// JSON file-based store
///
/// Writes `{"story_conversation_id": "<id>"}` atomically via temp file + rename.
pub struct FileConversationStore {
    path: PathBuf,
}

impl FileConversationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConversationStore for FileConversationStore {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read conversation file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let entries: HashMap<String, String> = serde_json::from_str(&content)?;
        Ok(entries.get(CONVERSATION_ID_KEY).cloned())
    }

    fn save(&self, id: &str) -> Result<()> {
        let mut entries = HashMap::new();
        entries.insert(CONVERSATION_ID_KEY, id);
        let json = serde_json::to_string_pretty(&entries)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to create conversation directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to write conversation file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to rename conversation file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %self.path.display(), "Conversation id saved");
        Ok(())
    }
}
