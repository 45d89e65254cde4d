//! Application state shared across all route handlers.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use parley_chat::ChatOrchestrator;
use parley_core::types::Settings;
use parley_speech::{SpeechToText, TextToSpeech};
use parley_storage::ConversationCache;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Working window of every conversation, backed by the transcript files.
    pub cache: Arc<ConversationCache>,
    /// Prompt composition and provider calls.
    pub chat: Arc<ChatOrchestrator>,
    pub stt: Arc<SpeechToText>,
    pub tts: Arc<TextToSpeech>,
    /// User settings, held in memory only.
    pub settings: Arc<Mutex<Settings>>,
    /// Speak assistant replies to `/voice` requests aloud.
    pub speak_voice_replies: bool,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create the state; the speech rate is initialized from `settings`.
    pub fn new(
        cache: Arc<ConversationCache>,
        chat: Arc<ChatOrchestrator>,
        stt: Arc<SpeechToText>,
        tts: Arc<TextToSpeech>,
        settings: Settings,
    ) -> Self {
        tts.set_rate(settings.voice_speed);
        Self {
            cache,
            chat,
            stt,
            tts,
            settings: Arc::new(Mutex::new(settings)),
            speak_voice_replies: false,
            start_time: Instant::now(),
        }
    }

    pub fn with_voice_replies(mut self, enabled: bool) -> Self {
        self.speak_voice_replies = enabled;
        self
    }

    /// Snapshot of the current settings.
    pub fn current_settings(&self) -> Settings {
        self.settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}
