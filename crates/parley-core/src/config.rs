use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Data directory with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.general.data_dir)
    }

    /// Directory holding one JSON transcript per conversation.
    ///
    /// Relative `history.dir` values are resolved against the data directory.
    pub fn history_dir(&self) -> PathBuf {
        let dir = expand_home(&self.history.dir);
        if dir.is_absolute() {
            dir
        } else {
            self.data_dir().join(dir)
        }
    }

    /// Resolve the generative-model API key: explicit value first, then the
    /// environment variable named by `provider.api_key_env`.
    pub fn provider_api_key(&self) -> Option<String> {
        self.provider
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.provider.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }
}

/// Expand `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for transcripts and the log file.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the HTTP server binds to.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley".to_string(),
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Generative-model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the Generative Language API.
    pub api_base: String,
    /// Fixed model identifier used for every call.
    pub model: String,
    /// API key. Prefer `api_key_env` so the key stays out of the file.
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    /// Number of recent history messages sent as prior turns (0 = prompt only).
    pub context_messages: usize,
    /// Optional request timeout. Unset means the call waits indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            api_key_env: "GOOGLE_API_KEY".to_string(),
            context_messages: 0,
            request_timeout_secs: None,
        }
    }
}

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Transcript directory, relative to the data directory unless absolute.
    pub dir: String,
    /// Messages kept in the in-memory working window per conversation.
    pub cache_limit: usize,
    /// Keep the whole transcript on disk instead of only the window.
    pub persist_full_history: bool,
    /// Capacity of the background persistence queue.
    pub save_queue_capacity: usize,
    /// Conversations kept in memory before the least recently used idle
    /// window is dropped.
    pub max_cached_conversations: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: "chat_history".to_string(),
            cache_limit: 40,
            persist_full_history: true,
            save_queue_capacity: 64,
            max_cached_conversations: 256,
        }
    }
}

/// Speech engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Whether the offline recognizer is attempted at all.
    pub enabled: bool,
    /// Path of the offline recognizer model file.
    pub offline_model_path: String,
    /// Sample rate the offline recognizer expects.
    pub sample_rate: u32,
    /// Size of each chunk fed to the offline recognizer.
    pub chunk_bytes: usize,
    /// `ffmpeg` binary used to decode non-WAV uploads.
    pub ffmpeg_path: String,
    /// Whether the cloud recognizer is used as fallback.
    pub cloud_enabled: bool,
    /// Cloud recognizer endpoint.
    pub cloud_url: String,
    /// Environment variable holding the cloud recognizer key.
    pub cloud_api_key_env: String,
    /// BCP-47 language code for the cloud recognizer.
    pub language: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            offline_model_path: "models/ggml-base.en.bin".to_string(),
            sample_rate: 16_000,
            chunk_bytes: 4000,
            ffmpeg_path: "ffmpeg".to_string(),
            cloud_enabled: true,
            cloud_url: "https://speech.googleapis.com/v1/speech:recognize".to_string(),
            cloud_api_key_env: "GOOGLE_API_KEY".to_string(),
            language: "en-US".to_string(),
        }
    }
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Whether speech output is available at all.
    pub enabled: bool,
    /// Neural TTS server returning WAV. Unset disables the primary engine.
    pub server_url: Option<String>,
    /// Command that plays a WAV file to completion.
    pub player_command: String,
    /// Arguments placed before the file path.
    pub player_args: Vec<String>,
    /// System voice command used as fallback.
    pub fallback_command: String,
    /// Initial system voice rate in words per minute.
    pub voice_rate: u32,
    /// Speak assistant replies produced by the `/voice` route.
    pub speak_voice_replies: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: None,
            player_command: "aplay".to_string(),
            player_args: vec!["-q".to_string()],
            fallback_command: "espeak".to_string(),
            voice_rate: 150,
            speak_voice_replies: false,
        }
    }
}

/// Defaults for the web client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// "light" or "dark".
    pub theme: String,
    pub tts_enabled: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            tts_enabled: true,
        }
    }
}
