//! Parley Storage crate - flat-file conversation transcripts.
//!
//! Provides the durable [`ConversationStore`] (one JSON file per
//! conversation), the [`PersistenceWorker`] that applies writes from a bounded
//! queue, and the [`ConversationCache`] holding the in-memory working window.

pub mod cache;
pub mod persist;
pub mod store;

pub use cache::ConversationCache;
pub use persist::{PersistenceHandle, PersistenceWorker, SaveMode};
pub use store::ConversationStore;
