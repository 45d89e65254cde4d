//! Speech-to-text orchestration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

use parley_core::error::{ParleyError, Result};

use crate::audio::{self, AudioContainer, AudioConverter};
use crate::fallback::{ChainOutcome, Engine, FallbackChain};
use crate::recognizer::{self, AcousticModel};

/// Engine that turns a recording into text.
///
/// `audio` is the recording exactly as uploaded; engines that need a
/// particular format convert it themselves.
#[async_trait]
pub trait Transcriber: Engine {
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Speech-to-text front: primary engine first, then the fallbacks.
pub struct SpeechToText {
    chain: FallbackChain<dyn Transcriber>,
}

impl SpeechToText {
    pub fn new(engines: Vec<Arc<dyn Transcriber>>) -> Self {
        Self {
            chain: FallbackChain::new("speech-to-text", engines, ParleyError::Transcription),
        }
    }

    /// Transcribe `audio`, returning an empty string when every engine failed.
    ///
    /// Callers must treat the empty string as "could not transcribe".
    pub async fn transcribe(&self, audio: &[u8]) -> String {
        match self.transcribe_detailed(audio).await.result {
            Ok(text) => text,
            Err(_) => String::new(),
        }
    }

    /// Like [`transcribe`](Self::transcribe) but keeps the chain outcome.
    pub async fn transcribe_detailed(&self, audio: &[u8]) -> ChainOutcome<String> {
        self.chain
            .run(|engine| async move {
                let text = engine.transcribe(audio).await?;
                if text.trim().is_empty() {
                    return Err(ParleyError::Transcription(format!(
                        "{} heard no speech",
                        engine.name()
                    )));
                }
                Ok(text)
            })
            .await
    }

    pub fn engines(&self) -> Vec<(String, bool)> {
        self.chain.availability()
    }
}

// =============================================================================
// Offline engine
// =============================================================================

/// Offline recognizer fed with mono PCM in fixed-size chunks.
pub struct OfflineTranscriber {
    converter: AudioConverter,
    model: Option<Arc<dyn AcousticModel>>,
    chunk_bytes: usize,
}

impl OfflineTranscriber {
    /// `model` is `None` when the model failed to load at startup.
    pub fn new(
        converter: AudioConverter,
        model: Option<Arc<dyn AcousticModel>>,
        chunk_bytes: usize,
    ) -> Self {
        Self {
            converter,
            model,
            chunk_bytes: chunk_bytes.max(2),
        }
    }
}

impl Engine for OfflineTranscriber {
    fn name(&self) -> &str {
        "offline"
    }

    fn is_available(&self) -> bool {
        self.model.is_some()
    }
}

#[async_trait]
impl Transcriber for OfflineTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| ParleyError::Transcription("Offline model not loaded".to_string()))?;

        let samples = self.converter.to_mono(audio).await?;
        let pcm = audio::to_pcm16(&samples);
        let sample_rate = self.converter.sample_rate();
        let chunk_bytes = self.chunk_bytes;

        let result = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut recognizer = model.recognizer(sample_rate)?;
            for chunk in pcm.chunks(chunk_bytes) {
                recognizer.accept_waveform(chunk)?;
            }
            recognizer.final_result()
        })
        .await
        .map_err(|e| ParleyError::Transcription(format!("Recognizer task failed: {}", e)))??;

        let text = recognizer::transcript_from_result(&result)?;
        tracing::info!(engine = "offline", text_len = text.len(), "Transcription complete");
        Ok(text)
    }
}

// =============================================================================
// Cloud engine
// =============================================================================

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Debug, Deserialize)]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Google Cloud Speech-to-Text (`speech:recognize`) over REST.
///
/// Receives the original recording, base64-encoded.
pub struct CloudTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    language: String,
}

impl CloudTranscriber {
    pub fn new(url: impl Into<String>, api_key: Option<String>, language: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            language: language.into(),
        }
    }

    fn request_body(&self, audio: &[u8]) -> serde_json::Value {
        let mut config = serde_json::json!({
            "languageCode": self.language,
            "enableAutomaticPunctuation": true,
        });
        // WAV and FLAC headers carry their own encoding.
        let encoding = match AudioContainer::sniff(audio) {
            AudioContainer::Ogg => Some("OGG_OPUS"),
            AudioContainer::WebM => Some("WEBM_OPUS"),
            AudioContainer::Wav | AudioContainer::Unknown => None,
        };
        if let Some(encoding) = encoding {
            config["encoding"] = serde_json::json!(encoding);
            config["sampleRateHertz"] = serde_json::json!(48000);
        }
        serde_json::json!({
            "config": config,
            "audio": { "content": base64::engine::general_purpose::STANDARD.encode(audio) },
        })
    }
}

impl Engine for CloudTranscriber {
    fn name(&self) -> &str {
        "cloud"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl Transcriber for CloudTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ParleyError::Transcription("No cloud speech API key".to_string()))?;

        let response = self
            .client
            .post(&self.url)
            .query(&[("key", key)])
            .json(&self.request_body(audio))
            .send()
            .await
            .map_err(|e| ParleyError::Transcription(format!("Cloud recognizer unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::Transcription(format!(
                "Cloud recognizer returned {}: {}",
                status, body
            )));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Transcription(format!("Bad cloud recognizer response: {}", e)))?;
        let text = parsed
            .results
            .iter()
            .filter_map(|r| r.alternatives.first())
            .map(|a| a.transcript.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::info!(engine = "cloud", text_len = text.len(), "Transcription complete");
        Ok(text)
    }
}

// =============================================================================
// Mock engine
// =============================================================================

/// Transcriber returning a fixed transcript or a fixed failure.
#[derive(Debug)]
pub struct MockTranscriber {
    name: String,
    transcript: Option<String>,
    available: bool,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn answering(name: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transcript: Some(transcript.into()),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transcript: None,
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Engine for MockTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if audio.is_empty() {
            return Err(ParleyError::Transcription("Empty audio".to_string()));
        }
        self.transcript
            .clone()
            .ok_or_else(|| ParleyError::Transcription(format!("{} failed", self.name)))
    }
}
