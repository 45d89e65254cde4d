//! Offline streaming recognizers.
//!
//! An [`AcousticModel`] is loaded once at startup and hands out a fresh
//! [`StreamingRecognizer`] per utterance. Recognizers consume 16-bit PCM in
//! chunks and report the final result as a JSON object with a `"text"` field.

use parley_core::error::{ParleyError, Result};

/// Loaded offline speech model.
pub trait AcousticModel: Send + Sync {
    fn name(&self) -> &str;

    /// Start recognizing one utterance sampled at `sample_rate`.
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>>;
}

/// Per-utterance recognizer state.
pub trait StreamingRecognizer: Send {
    /// Feed one chunk of little-endian 16-bit mono PCM.
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<()>;

    /// Finish the utterance and return `{"text": "..."}`.
    fn final_result(&mut self) -> Result<String>;
}

/// Extract the transcript from a recognizer's final result.
pub fn transcript_from_result(json: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    value
        .get("text")
        .and_then(|t| t.as_str())
        .map(|t| t.trim().to_string())
        .ok_or_else(|| ParleyError::Transcription("Recognizer result has no text field".to_string()))
}

// =============================================================================
// whisper.cpp model
// =============================================================================

/// whisper.cpp model loaded from a GGML file.
///
/// whisper decodes whole utterances, so the recognizer buffers every chunk
/// and runs inference in [`StreamingRecognizer::final_result`].
pub struct WhisperModel {
    #[cfg(feature = "whisper")]
    ctx: std::sync::Arc<whisper_rs::WhisperContext>,
    language: String,
}

impl WhisperModel {
    /// Load the model at `model_path`.
    ///
    /// # Errors
    /// Returns `ParleyError::Transcription` if the file is missing or fails to
    /// load.
    #[cfg(feature = "whisper")]
    pub fn load(model_path: &std::path::Path, language: &str) -> Result<Self> {
        use whisper_rs::{WhisperContext, WhisperContextParameters};

        if !model_path.exists() {
            return Err(ParleyError::Transcription(format!(
                "Offline model file not found: {}",
                model_path.display()
            )));
        }
        let path = model_path.to_str().ok_or_else(|| {
            ParleyError::Transcription(format!("Model path is not UTF-8: {}", model_path.display()))
        })?;

        tracing::info!(model = %path, "Loading whisper model");
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| ParleyError::Transcription(format!("Failed to load whisper model: {}", e)))?;
        tracing::info!("Whisper model loaded");

        Ok(Self {
            ctx: std::sync::Arc::new(ctx),
            language: whisper_language(language),
        })
    }

    /// Without the `whisper` feature there is no offline engine.
    #[cfg(not(feature = "whisper"))]
    pub fn load(model_path: &std::path::Path, language: &str) -> Result<Self> {
        let _ = (model_path, language);
        Err(ParleyError::Transcription(
            "Offline recognition requires the `whisper` feature".to_string(),
        ))
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

/// `en-US` -> `en`; whisper only takes the primary subtag.
fn whisper_language(language: &str) -> String {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or("en")
        .to_ascii_lowercase()
}

impl AcousticModel for WhisperModel {
    fn name(&self) -> &str {
        "whisper"
    }

    #[cfg(feature = "whisper")]
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>> {
        Ok(Box::new(WhisperRecognizer {
            ctx: std::sync::Arc::clone(&self.ctx),
            language: self.language.clone(),
            sample_rate,
            pcm: Vec::new(),
        }))
    }

    #[cfg(not(feature = "whisper"))]
    fn recognizer(&self, _sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>> {
        Err(ParleyError::Transcription(
            "Offline recognition requires the `whisper` feature".to_string(),
        ))
    }
}

#[cfg(feature = "whisper")]
struct WhisperRecognizer {
    ctx: std::sync::Arc<whisper_rs::WhisperContext>,
    language: String,
    sample_rate: u32,
    pcm: Vec<u8>,
}

#[cfg(feature = "whisper")]
impl StreamingRecognizer for WhisperRecognizer {
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<()> {
        self.pcm.extend_from_slice(pcm);
        Ok(())
    }

    fn final_result(&mut self) -> Result<String> {
        use whisper_rs::{FullParams, SamplingStrategy};

        let samples = crate::audio::resample(
            &crate::audio::from_pcm16(&self.pcm),
            self.sample_rate,
            16000,
        );
        self.pcm.clear();
        if samples.is_empty() {
            return Ok(serde_json::json!({ "text": "" }).to_string());
        }

        let mut state = self.ctx.create_state().map_err(|e| {
            ParleyError::Transcription(format!("Failed to create whisper state: {}", e))
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(self.language.as_str()));
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &samples)
            .map_err(|e| ParleyError::Transcription(format!("Whisper inference failed: {}", e)))?;

        let n_segments = state.full_n_segments().map_err(|e| {
            ParleyError::Transcription(format!("Failed to get segment count: {}", e))
        })?;
        let mut text = String::new();
        for i in 0..n_segments {
            let segment = state.full_get_segment_text(i).map_err(|e| {
                ParleyError::Transcription(format!("Failed to get segment {} text: {}", i, e))
            })?;
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(segment.trim());
        }

        tracing::debug!(segments = n_segments, text_len = text.len(), "Whisper utterance decoded");
        Ok(serde_json::json!({ "text": text }).to_string())
    }
}

// =============================================================================
// Scripted model
// =============================================================================

/// Model that returns a fixed transcript, or fails on demand.
///
/// Used for testing the offline path without a real model.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    transcript: Option<String>,
}

impl ScriptedModel {
    pub fn answering(transcript: impl Into<String>) -> Self {
        Self {
            transcript: Some(transcript.into()),
        }
    }

    pub fn failing() -> Self {
        Self { transcript: None }
    }
}

impl AcousticModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognizer(&self, _sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>> {
        Ok(Box::new(ScriptedRecognizer {
            transcript: self.transcript.clone(),
            received: 0,
            chunks: 0,
        }))
    }
}

struct ScriptedRecognizer {
    transcript: Option<String>,
    received: usize,
    chunks: usize,
}

impl StreamingRecognizer for ScriptedRecognizer {
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<()> {
        self.received += pcm.len();
        self.chunks += 1;
        Ok(())
    }

    fn final_result(&mut self) -> Result<String> {
        match &self.transcript {
            Some(text) => Ok(serde_json::json!({
                "text": text,
                "bytes": self.received,
                "chunks": self.chunks,
            })
            .to_string()),
            None => Err(ParleyError::Transcription(
                "Scripted recognizer failure".to_string(),
            )),
        }
    }
}
