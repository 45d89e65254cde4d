//! Parley API crate - axum HTTP surface for the assistant.
//!
//! Exposes chat, voice, translation, speech, conversation management and
//! settings endpoints, plus the embedded single-page web client.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;
pub mod ui;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
