//! Parley Speech crate - speech-to-text and text-to-speech orchestration.
//!
//! Each capability is an ordered [`FallbackChain`] of engines behind one
//! trait ([`Transcriber`] or [`Synthesizer`]). The orchestrators try the
//! engines in order, stop at the first success and never surface an error:
//! [`SpeechToText`] returns an empty transcript and [`TextToSpeech`] returns
//! `false` when every engine failed.

pub mod audio;
pub mod command;
pub mod fallback;
pub mod recognizer;
pub mod stt;
pub mod tts;

pub use audio::AudioConverter;
pub use fallback::{ChainOutcome, ChainState, Engine, FallbackChain};
pub use recognizer::{AcousticModel, ScriptedModel, StreamingRecognizer, WhisperModel};
pub use stt::{CloudTranscriber, MockTranscriber, OfflineTranscriber, SpeechToText, Transcriber};
pub use tts::{MockSynthesizer, NeuralSynthesizer, Synthesizer, SystemVoice, TextToSpeech};
