//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its request via axum extractors, calls into the
//! orchestrators held by [`AppState`] and returns a JSON response.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use parley_chat::Reply;
use parley_core::types::{
    display_timestamp, ConversationId, ConversationSummary, Role, Settings, Theme,
    SUPPORTED_LANGUAGES,
};

use crate::error::ApiError;
use crate::session::{
    conversation_from_cookie, require_conversation, resolve_conversation, session_cookie,
};
use crate::state::AppState;
use crate::ui::INDEX_HTML;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub conversation_id: Option<String>,
    /// Optional image as a `data:image/...;base64,` URI.
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub text: String,
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceChatRequest {
    /// Recording as a base64 data URI.
    pub audio: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationRequest {
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub tts_enabled: Option<bool>,
    pub voice_speed: Option<u32>,
    pub theme: Option<Theme>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub timestamp: String,
    pub conversation_id: ConversationId,
    /// True when the provider failed and `response` is a substitute text.
    pub degraded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpeakResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceResponse {
    pub transcription: String,
    pub response: String,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub original: String,
    pub translation: String,
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub conversations: Vec<ConversationSummary>,
    pub active_conversation_id: ConversationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadChatResponse {
    pub success: bool,
    pub conversation_id: ConversationId,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub success: bool,
    pub settings: Settings,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceSessionResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineStatus {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpeechStatus {
    pub speech_to_text: Vec<EngineStatus>,
    pub text_to_speech: Vec<EngineStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub model: String,
    pub cached_conversations: usize,
    pub speech: SpeechStatus,
}

// =============================================================================
// Page and health
// =============================================================================

/// GET / - serve the web client, starting a session if there is none.
pub async fn index(headers: HeaderMap) -> Response {
    match conversation_from_cookie(&headers) {
        Some(_) => Html(INDEX_HTML).into_response(),
        None => {
            let id = ConversationId::generate();
            tracing::debug!(conversation_id = %id, "New browser session");
            (session_cookie(&id), Html(INDEX_HTML)).into_response()
        }
    }
}

/// GET /health - liveness plus speech engine availability.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engines = |list: Vec<(String, bool)>| -> Vec<EngineStatus> {
        list.into_iter()
            .map(|(name, available)| EngineStatus { name, available })
            .collect()
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        model: state.chat.model_id().to_string(),
        cached_conversations: state.cache.cached_conversations(),
        speech: SpeechStatus {
            speech_to_text: engines(state.stt.engines()),
            text_to_speech: engines(state.tts.engines()),
        },
    })
}

// =============================================================================
// Chat and translation
// =============================================================================

/// POST /chat - answer a text message (optionally with an image).
///
/// Provider failures are absorbed: the reply carries a substitute text and
/// `degraded: true` with status 200.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("No message provided".to_string()))?;
    let id = resolve_conversation(req.conversation_id.as_deref(), &headers)?;

    let reply = state
        .chat
        .respond(&message, &id, req.image.as_deref())
        .await?;

    let body = ChatResponse {
        degraded: reply.is_degraded(),
        response: reply.into_text(),
        timestamp: display_timestamp(),
        conversation_id: id.clone(),
    };
    Ok((session_cookie(&id), Json(body)).into_response())
}

/// POST /translate - translate text into `lang`.
///
/// A provider failure is reported with status 502 and the degraded text in
/// both `error` and `translation`.
pub async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Response, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("No text provided".to_string()));
    }
    let language = req.lang.unwrap_or_else(|| "en".to_string());

    let response = match state.chat.translate(&req.text, &language).await {
        Reply::Answer(translation) => (
            StatusCode::OK,
            Json(TranslateResponse {
                error: None,
                original: req.text,
                translation,
                language,
            }),
        ),
        Reply::Degraded { message, .. } => (
            StatusCode::BAD_GATEWAY,
            Json(TranslateResponse {
                error: Some(message.clone()),
                original: req.text,
                translation: message,
                language,
            }),
        ),
    };
    Ok(response.into_response())
}

/// GET /available_languages - language code to display name.
pub async fn available_languages() -> Json<BTreeMap<&'static str, &'static str>> {
    Json(SUPPORTED_LANGUAGES.iter().copied().collect())
}

// =============================================================================
// Speech
// =============================================================================

/// POST /speak - speak text aloud on the server.
pub async fn speak(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Json<SpeakResponse> {
    if req.text.trim().is_empty() {
        return Json(SpeakResponse {
            success: false,
            error: Some("No text provided".to_string()),
        });
    }
    let language = req.lang.unwrap_or_else(|| "en".to_string());
    let success = state.tts.speak(&req.text, &language).await;
    Json(SpeakResponse {
        success,
        error: None,
    })
}

/// POST /voice - multipart upload (`audio` file, optional `conversation_id`).
pub async fn voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut audio: Option<Vec<u8>> = None;
    let mut explicit_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("audio") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid audio upload: {}", e)))?;
                audio = Some(bytes.to_vec());
            }
            Some("conversation_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid conversation id: {}", e)))?;
                explicit_id = Some(text);
            }
            _ => {}
        }
    }

    let audio = audio
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No audio file provided".to_string()))?;
    let id = resolve_conversation(explicit_id.as_deref(), &headers)?;

    let body = voice_exchange(&state, &audio, id.clone()).await?;

    let settings = state.current_settings();
    if state.speak_voice_replies && settings.tts_enabled {
        let tts = Arc::clone(&state.tts);
        let text = body.response.clone();
        tokio::spawn(async move {
            tts.speak(&text, "en").await;
        });
    }

    Ok((session_cookie(&id), Json(body)).into_response())
}

/// POST /voice_chat - JSON body with a base64 data-URI recording.
pub async fn voice_chat(
    State(state): State<AppState>,
    Json(req): Json<VoiceChatRequest>,
) -> Result<Json<VoiceResponse>, ApiError> {
    let encoded = req
        .audio
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("No audio data provided".to_string()))?;
    let payload = encoded
        .split_once(',')
        .map(|(_, data)| data)
        .unwrap_or(encoded.as_str());
    let audio = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid audio data: {}", e)))?;

    let id = match req.conversation_id.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => ConversationId::parse(raw.trim())?,
        None => ConversationId::generate(),
    };

    Ok(Json(voice_exchange(&state, &audio, id).await?))
}

/// Transcribe, then answer the transcript within conversation `id`.
async fn voice_exchange(
    state: &AppState,
    audio: &[u8],
    id: ConversationId,
) -> Result<VoiceResponse, ApiError> {
    let transcription = state.stt.transcribe(audio).await;
    if transcription.trim().is_empty() {
        return Err(ApiError::UnprocessableEntity(
            "Could not transcribe audio".to_string(),
        ));
    }

    let reply = state.chat.respond(&transcription, &id, None).await?;
    Ok(VoiceResponse {
        transcription,
        response: reply.into_text(),
        conversation_id: id,
    })
}

/// POST /start_voice_session - hand out a voice session id.
pub async fn start_voice_session() -> Json<VoiceSessionResponse> {
    Json(VoiceSessionResponse {
        session_id: uuid::Uuid::new_v4().to_string(),
        message: "Voice session started. Use the session_id for subsequent requests.".to_string(),
    })
}

// =============================================================================
// Conversations
// =============================================================================

/// GET /get_conversations - stored conversations, newest first.
pub async fn get_conversations(State(state): State<AppState>) -> Json<Vec<ConversationSummary>> {
    Json(state.cache.list().await)
}

/// POST /clear_conversation - wipe a conversation and start a fresh one.
pub async fn clear_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // The body is optional; the cookie names the conversation otherwise.
    let req: ConversationRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ConversationRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };
    let target = match req.conversation_id.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(ConversationId::parse(raw.trim())?),
        _ => conversation_from_cookie(&headers),
    };
    let target =
        target.ok_or_else(|| ApiError::BadRequest("No conversation ID provided".to_string()))?;

    state.cache.clear(&target).await?;
    tracing::info!(conversation_id = %target, "Conversation cleared");

    let fresh = ConversationId::generate();
    let body = ClearResponse {
        success: true,
        conversation_id: fresh.clone(),
    };
    Ok((session_cookie(&fresh), Json(body)).into_response())
}

/// POST /delete_conversation - delete a conversation.
///
/// Deleting the active conversation starts a fresh one.
pub async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConversationRequest>,
) -> Result<Response, ApiError> {
    let target = require_conversation(req.conversation_id.as_deref())?;
    state.cache.clear(&target).await?;

    let active = conversation_from_cookie(&headers);
    let (active, changed) = match active {
        Some(current) if current != target => (current, false),
        _ => (ConversationId::generate(), true),
    };

    let body = DeleteResponse {
        success: true,
        conversations: state.cache.list().await,
        active_conversation_id: active.clone(),
    };
    if changed {
        Ok((session_cookie(&active), Json(body)).into_response())
    } else {
        Ok(Json(body).into_response())
    }
}

/// POST /load_chat - full transcript of a conversation, made active.
pub async fn load_chat(
    State(state): State<AppState>,
    Json(req): Json<ConversationRequest>,
) -> Result<Response, ApiError> {
    let id = require_conversation(req.conversation_id.as_deref())?;
    let history = state.cache.open(&id).await?;

    let now = display_timestamp();
    let history = history
        .into_iter()
        .map(|m| HistoryEntry {
            role: m.role,
            content: m.content,
            timestamp: m.timestamp.unwrap_or_else(|| now.clone()),
        })
        .collect();

    let body = LoadChatResponse {
        success: true,
        conversation_id: id.clone(),
        history,
    };
    Ok((session_cookie(&id), Json(body)).into_response())
}

// =============================================================================
// Settings
// =============================================================================

/// GET /settings - current in-memory settings.
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.current_settings())
}

/// POST /settings - merge an update into the settings.
///
/// `voice_speed` also changes the system voice rate immediately.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsResponse>, ApiError> {
    if update.voice_speed == Some(0) {
        return Err(ApiError::BadRequest(
            "voice_speed must be greater than 0".to_string(),
        ));
    }

    let settings = {
        let mut settings = state
            .settings
            .lock()
            .map_err(|e| ApiError::Internal(format!("settings lock poisoned: {}", e)))?;
        if let Some(enabled) = update.tts_enabled {
            settings.tts_enabled = enabled;
        }
        if let Some(speed) = update.voice_speed {
            settings.voice_speed = speed;
        }
        if let Some(theme) = update.theme {
            settings.theme = theme;
        }
        settings.clone()
    };
    state.tts.set_rate(settings.voice_speed);

    Ok(Json(SettingsResponse {
        success: true,
        settings,
    }))
}
