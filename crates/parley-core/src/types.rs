//! Domain types shared by every Parley crate.

use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParleyError;

/// Display format used for message and conversation timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Maximum length of a conversation identifier.
const MAX_ID_LEN: usize = 64;

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn display_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

// =============================================================================
// Conversation identifiers
// =============================================================================

/// Opaque identifier of a conversation.
///
/// Doubles as the file stem of the transcript on disk, so only ASCII
/// alphanumerics, `-` and `_` are accepted (1 to 64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate and wrap an identifier.
    pub fn parse(raw: &str) -> Result<Self, ParleyError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(ParleyError::InvalidConversationId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConversationId {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = ParleyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of a conversation transcript.
///
/// Serialized as `{"role", "content"}` plus an optional `"timestamp"`, which
/// is the on-disk format of a transcript file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }

    /// Stamp the message with the current local time.
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(display_timestamp());
        self
    }
}

// =============================================================================
// Listings and settings
// =============================================================================

/// Entry of the conversation list shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub timestamp: String,
}

/// Colour scheme of the web client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// User-adjustable settings held in process memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub tts_enabled: bool,
    /// Words per minute of the system voice.
    pub voice_speed: u32,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tts_enabled: true,
            voice_speed: 150,
            theme: Theme::Light,
        }
    }
}

/// Languages offered for translation and speech, as `(code, display name)`.
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("ja", "Japanese"),
    ("zh-cn", "Chinese (Simplified)"),
    ("ar", "Arabic"),
    ("hi", "Hindi"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_accepts_uuid_and_short_tokens() {
        let generated = ConversationId::generate();
        assert!(ConversationId::parse(generated.as_str()).is_ok());
        assert_eq!(ConversationId::parse("abc123").unwrap().as_str(), "abc123");
        assert!(ConversationId::parse("chat_2024-01").is_ok());
    }

    #[test]
    fn test_conversation_id_rejects_path_like_values() {
        for bad in ["", "../secrets", "a/b", "a.json", "with space", "ümlaut"] {
            let err = ConversationId::parse(bad).unwrap_err();
            assert!(matches!(err, ParleyError::InvalidConversationId(_)), "{bad}");
        }
        assert!(ConversationId::parse(&"x".repeat(65)).is_err());
        assert!(ConversationId::parse(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_conversation_id_serde_validates() {
        let id: ConversationId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(id.to_string(), "abc123");
        assert!(serde_json::from_str::<ConversationId>("\"../x\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);

        let parsed: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"yo","timestamp":"2024-01-01 10:00"}"#)
                .unwrap();
        assert_eq!(parsed.role, Role::Assistant);
        assert_eq!(parsed.timestamp.as_deref(), Some("2024-01-01 10:00"));
    }

    #[test]
    fn test_stamped_message_has_timestamp() {
        let msg = Message::assistant("ok").stamped();
        let ts = msg.timestamp.unwrap();
        assert_eq!(ts.len(), "2024-01-01 10:00".len());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.tts_enabled);
        assert_eq!(settings.voice_speed, 150);
        assert_eq!(settings.theme, Theme::Light);
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["theme"], "light");
    }

    #[test]
    fn test_supported_languages_contains_english() {
        assert!(SUPPORTED_LANGUAGES.iter().any(|(code, _)| *code == "en"));
        assert_eq!(SUPPORTED_LANGUAGES.len(), 11);
    }
}
