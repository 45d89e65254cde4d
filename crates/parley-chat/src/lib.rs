//! Parley Chat crate - generative-model provider and chat orchestration.
//!
//! The [`ChatOrchestrator`] composes prompts (optionally with an image),
//! calls a [`GenerativeModel`] and records successful exchanges in the
//! conversation cache. Provider failures are absorbed into a degraded
//! [`Reply`] instead of propagating.

pub mod attachment;
pub mod error;
pub mod orchestrator;
pub mod provider;

pub use attachment::ImageAttachment;
pub use error::ChatError;
pub use orchestrator::{ChatOrchestrator, Reply};
pub use provider::{GeminiProvider, GenerationRequest, GenerativeModel, MockModel, Turn};
