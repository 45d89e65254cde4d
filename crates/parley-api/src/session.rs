//! Browser session: the active conversation id lives in a cookie.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use parley_core::types::ConversationId;

use crate::error::ApiError;

/// Name of the cookie holding the active conversation id.
pub const SESSION_COOKIE: &str = "parley_conversation";

/// Active conversation id from the request cookies, if present and valid.
pub fn conversation_from_cookie(headers: &HeaderMap) -> Option<ConversationId> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| ConversationId::parse(value.trim()).ok())
}

/// Resolve the conversation a request targets.
///
/// An explicit id wins and must be valid; otherwise the session cookie is
/// used, and failing that a fresh id is generated.
pub fn resolve_conversation(
    explicit: Option<&str>,
    headers: &HeaderMap,
) -> Result<ConversationId, ApiError> {
    match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Ok(ConversationId::parse(raw)?),
        None => Ok(conversation_from_cookie(headers).unwrap_or_else(ConversationId::generate)),
    }
}

/// Parse a required conversation id from a request body.
pub fn require_conversation(explicit: Option<&str>) -> Result<ConversationId, ApiError> {
    let raw = explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No conversation ID provided".to_string()))?;
    Ok(ConversationId::parse(raw)?)
}

/// `Set-Cookie` header making `id` the active conversation.
pub fn session_cookie(id: &ConversationId) -> [(HeaderName, HeaderValue); 1] {
    // Ids are validated to ASCII alphanumerics, '-' and '_'.
    let value = HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, id
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("parley_conversation=; Path=/"));
    [(SET_COOKIE, value)]
}
