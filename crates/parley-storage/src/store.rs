//! Durable conversation transcripts, one JSON file per conversation.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};

use parley_core::error::{ParleyError, Result};
use parley_core::types::{ConversationId, ConversationSummary, Message, Role, TIMESTAMP_FORMAT};

/// Characters of the first user message used as a conversation title.
const TITLE_MAX_CHARS: usize = 30;

/// File-backed conversation store.
///
/// Owns the lifecycle of `<dir>/<conversation_id>.json`. Each file holds the
/// ordered array of messages of one conversation.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ParleyError::Persistence(format!(
                "Failed to create history directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist `history`, replacing whatever was stored for `id`.
    ///
    /// Never fails the caller: I/O errors are logged and reported through
    /// the returned flag.
    pub fn save(&self, id: &ConversationId, history: &[Message]) -> bool {
        match self.write(id, history) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(conversation_id = %id, error = %e, "Error saving conversation");
                false
            }
        }
    }

    /// Append `messages` to the stored transcript of `id`.
    ///
    /// Same failure contract as [`save`](Self::save). A missing file starts
    /// a new transcript; a file that cannot be read or parsed is left
    /// untouched and the append is refused.
    pub fn append(&self, id: &ConversationId, messages: &[Message]) -> bool {
        let path = self.path_for(id);
        let mut history = match read_history(&path) {
            Ok(history) => history,
            Err(ParleyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::error!(
                    conversation_id = %id,
                    error = %e,
                    "Refusing to append to unreadable conversation"
                );
                return false;
            }
        };
        history.extend_from_slice(messages);
        self.save(id, &history)
    }

    /// Fallible write used by [`save`](Self::save).
    ///
    /// Writes to a sibling temp file and renames it over the target so a
    /// crash mid-write never leaves a truncated transcript behind.
    pub fn write(&self, id: &ConversationId, history: &[Message]) -> Result<()> {
        let path = self.path_for(id);
        let tmp = self.dir.join(format!(".{}.json.tmp", id));
        let content = serde_json::to_string_pretty(history)?;
        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                ParleyError::Persistence(format!("Failed to write {}: {}", path.display(), e))
            })?;
        tracing::debug!(conversation_id = %id, messages = history.len(), "Conversation saved");
        Ok(())
    }

    /// Load the stored transcript of `id`.
    ///
    /// Missing or unreadable files yield an empty history.
    pub fn load(&self, id: &ConversationId) -> Vec<Message> {
        let path = self.path_for(id);
        if !path.exists() {
            return Vec::new();
        }
        match read_history(&path) {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(conversation_id = %id, error = %e, "Error loading conversation");
                Vec::new()
            }
        }
    }

    /// List stored conversations, newest first.
    ///
    /// Empty transcripts and files that fail to parse are skipped.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(dir = %self.dir.display(), error = %e, "Error listing conversations");
                return Vec::new();
            }
        };

        let mut found: Vec<(SystemTime, ConversationSummary)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| ConversationId::parse(s).ok())
            else {
                continue;
            };

            let history = match read_history(&path) {
                Ok(h) if !h.is_empty() => h,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable conversation");
                    continue;
                }
            };

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            found.push((
                modified,
                ConversationSummary {
                    id,
                    title: title_for(&history),
                    timestamp: DateTime::<Local>::from(modified)
                        .format(TIMESTAMP_FORMAT)
                        .to_string(),
                },
            ));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0));
        found.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Remove the transcript of `id`.
    ///
    /// Idempotent: returns `Ok(false)` when there was nothing to remove.
    pub fn delete(&self, id: &ConversationId) -> Result<bool> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => {
                tracing::info!(conversation_id = %id, "Conversation deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ParleyError::Persistence(format!(
                "Failed to delete conversation {}: {}",
                id, e
            ))),
        }
    }
}

fn read_history(path: &Path) -> Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Title of a conversation: its first user message, shortened.
fn title_for(history: &[Message]) -> String {
    let Some(first) = history.iter().find(|m| m.role == Role::User) else {
        return "Untitled".to_string();
    };
    if first.content.chars().count() > TITLE_MAX_CHARS {
        let head: String = first.content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        first.content.clone()
    }
}
