//! Text-to-speech orchestration.

use std::io::Write;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parley_core::error::{ParleyError, Result};

use crate::command;
use crate::fallback::{ChainOutcome, ChainState, Engine, FallbackChain};

/// Engine that speaks text aloud, returning once playback finished.
#[async_trait]
pub trait Synthesizer: Engine {
    async fn speak(&self, text: &str, language: &str) -> Result<()>;
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Text-to-speech front: neural voice first, then the system voice.
pub struct TextToSpeech {
    chain: FallbackChain<dyn Synthesizer>,
    rate: Arc<AtomicU32>,
}

impl TextToSpeech {
    /// `rate` is shared with the engines that honor a speaking rate.
    pub fn new(engines: Vec<Arc<dyn Synthesizer>>, rate: Arc<AtomicU32>) -> Self {
        Self {
            chain: FallbackChain::new("text-to-speech", engines, ParleyError::Synthesis),
            rate,
        }
    }

    /// Speak `text`; returns whether any engine managed to.
    pub async fn speak(&self, text: &str, language: &str) -> bool {
        self.speak_detailed(text, language).await.result.is_ok()
    }

    pub async fn speak_detailed(&self, text: &str, language: &str) -> ChainOutcome<()> {
        if text.trim().is_empty() {
            tracing::warn!("Nothing to speak");
            return ChainOutcome {
                result: Err(ParleyError::Synthesis("No text to speak".to_string())),
                engine: None,
                trail: vec![ChainState::Idle, ChainState::Failure],
            };
        }
        self.chain
            .run(|engine| async move { engine.speak(text, language).await })
            .await
    }

    /// Words per minute of the system voice.
    pub fn rate(&self) -> u32 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, words_per_minute: u32) {
        self.rate.store(words_per_minute, Ordering::Relaxed);
        tracing::info!(rate = words_per_minute, "Voice rate updated");
    }

    pub fn engines(&self) -> Vec<(String, bool)> {
        self.chain.availability()
    }
}

// =============================================================================
// Neural engine
// =============================================================================

/// HTTP TTS server returning WAV, played by an external player.
///
/// The server is queried as `GET <url>?text=...&language_id=...`.
pub struct NeuralSynthesizer {
    client: reqwest::Client,
    server_url: Option<String>,
    player_command: String,
    player_args: Vec<String>,
}

impl NeuralSynthesizer {
    /// `server_url` is `None` when no server is configured.
    pub fn new(
        server_url: Option<String>,
        player_command: impl Into<String>,
        player_args: Vec<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.filter(|u| !u.is_empty()),
            player_command: player_command.into(),
            player_args,
        }
    }

    async fn synthesize(&self, url: &str, text: &str, language: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .query(&[("text", text), ("language_id", language)])
            .send()
            .await
            .map_err(|e| ParleyError::Synthesis(format!("TTS server unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::Synthesis(format!("TTS server returned {}", status)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ParleyError::Synthesis(format!("TTS download failed: {}", e)))?;
        if bytes.is_empty() {
            return Err(ParleyError::Synthesis("TTS server returned no audio".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

impl Engine for NeuralSynthesizer {
    fn name(&self) -> &str {
        "neural"
    }

    fn is_available(&self) -> bool {
        self.server_url.is_some()
    }
}

#[async_trait]
impl Synthesizer for NeuralSynthesizer {
    async fn speak(&self, text: &str, language: &str) -> Result<()> {
        let url = self
            .server_url
            .as_deref()
            .ok_or_else(|| ParleyError::Synthesis("No TTS server configured".to_string()))?;
        let wav = self.synthesize(url, text, language).await?;

        // Removed when `file` drops, on every path.
        let mut file = tempfile::Builder::new()
            .prefix("parley-tts-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(&wav)?;
        file.flush()?;

        let mut args: Vec<std::ffi::OsString> =
            self.player_args.iter().map(Into::into).collect();
        args.push(file.path().as_os_str().to_os_string());
        command::run(&self.player_command, args, ParleyError::Synthesis).await?;

        tracing::debug!(engine = "neural", bytes = wav.len(), "Speech played");
        Ok(())
    }
}

// =============================================================================
// System voice
// =============================================================================

/// Local speech command such as `espeak`, speaking synchronously.
pub struct SystemVoice {
    command: String,
    rate: Arc<AtomicU32>,
}

impl SystemVoice {
    pub fn new(command: impl Into<String>, rate: Arc<AtomicU32>) -> Self {
        Self {
            command: command.into(),
            rate,
        }
    }

    fn args(&self, text: &str, language: &str) -> Vec<String> {
        let mut args = vec!["-s".to_string(), self.rate.load(Ordering::Relaxed).to_string()];
        if !language.is_empty() {
            args.push("-v".to_string());
            args.push(language.to_ascii_lowercase());
        }
        args.push("--".to_string());
        args.push(text.to_string());
        args
    }
}

impl Engine for SystemVoice {
    fn name(&self) -> &str {
        "system"
    }

    fn is_available(&self) -> bool {
        !self.command.is_empty()
    }
}

#[async_trait]
impl Synthesizer for SystemVoice {
    async fn speak(&self, text: &str, language: &str) -> Result<()> {
        command::run(&self.command, self.args(text, language), ParleyError::Synthesis).await?;
        tracing::debug!(engine = "system", chars = text.chars().count(), "Speech played");
        Ok(())
    }
}

// =============================================================================
// Mock engine
// =============================================================================

/// Synthesizer recording what it was asked to say.
#[derive(Debug)]
pub struct MockSynthesizer {
    name: String,
    succeed: bool,
    available: bool,
    calls: AtomicUsize,
    spoken: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn working(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeed: true,
            available: true,
            calls: AtomicUsize::new(0),
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            succeed: false,
            ..Self::working(name)
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Engine for MockSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn speak(&self, text: &str, _language: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed {
            return Err(ParleyError::Synthesis(format!("{} failed", self.name)));
        }
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(150))
    }

    #[tokio::test]
    async fn test_disabled_primary_still_succeeds_via_fallback() {
        let primary = Arc::new(MockSynthesizer::working("neural").unavailable());
        let fallback = Arc::new(MockSynthesizer::working("system"));
        let tts = TextToSpeech::new(vec![primary.clone(), fallback.clone()], rate());

        assert!(tts.speak("hello", "en").await);
        assert_eq!(primary.calls(), 0);
        assert_eq!(fallback.spoken(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_primary_error_falls_back() {
        let primary = Arc::new(MockSynthesizer::failing("neural"));
        let fallback = Arc::new(MockSynthesizer::working("system"));
        let tts = TextToSpeech::new(vec![primary.clone(), fallback.clone()], rate());

        let outcome = tts.speak_detailed("hola", "es").await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.engine.as_deref(), Some("system"));
        assert_eq!(
            outcome.trail,
            vec![
                ChainState::Idle,
                ChainState::PrimaryAttempt,
                ChainState::FallbackAttempt,
                ChainState::Success
            ]
        );
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_engines_failing_returns_false() {
        let tts = TextToSpeech::new(
            vec![
                Arc::new(MockSynthesizer::failing("neural")),
                Arc::new(MockSynthesizer::failing("system")),
            ],
            rate(),
        );
        assert!(!tts.speak("hello", "en").await);
    }

    #[tokio::test]
    async fn test_blank_text_is_not_spoken() {
        let engine = Arc::new(MockSynthesizer::working("system"));
        let tts = TextToSpeech::new(vec![engine.clone()], rate());
        assert!(!tts.speak("   ", "en").await);
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_rate_is_shared_with_system_voice() {
        let shared = rate();
        let voice = SystemVoice::new("espeak", Arc::clone(&shared));
        let tts = TextToSpeech::new(Vec::new(), Arc::clone(&shared));

        tts.set_rate(200);
        assert_eq!(tts.rate(), 200);
        let args = voice.args("hi there", "EN");
        assert_eq!(args, vec!["-s", "200", "-v", "en", "--", "hi there"]);
        assert_eq!(voice.args("x", ""), vec!["-s", "200", "--", "x"]);
    }

    #[test]
    fn test_neural_without_server_is_unavailable() {
        let neural = NeuralSynthesizer::new(None, "aplay", vec!["-q".to_string()]);
        assert!(!neural.is_available());
        let neural = NeuralSynthesizer::new(Some(String::new()), "aplay", Vec::new());
        assert!(!neural.is_available());
    }

    #[tokio::test]
    async fn test_missing_system_voice_binary_fails() {
        let voice = SystemVoice::new("parley-no-such-espeak", rate());
        let err = voice.speak("hello", "en").await.unwrap_err();
        assert!(matches!(err, ParleyError::Synthesis(_)));
    }
}
