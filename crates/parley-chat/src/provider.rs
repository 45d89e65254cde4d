//! Generative-model providers.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_core::config::ProviderConfig;
use parley_core::types::Role;

use crate::attachment::ImageAttachment;
use crate::error::ChatError;

/// One turn of the request sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub image: Option<ImageAttachment>,
}

/// Everything the model sees for one call; the last turn is the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub turns: Vec<Turn>,
}

impl GenerationRequest {
    /// Plain text prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::User,
                text: text.into(),
                image: None,
            }],
        }
    }

    /// Multi-part prompt: text plus an inline image.
    pub fn with_image(text: impl Into<String>, image: ImageAttachment) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::User,
                text: text.into(),
                image: Some(image),
            }],
        }
    }

    /// Prepend earlier turns as context.
    pub fn after(mut self, history: impl IntoIterator<Item = (Role, String)>) -> Self {
        let mut turns: Vec<Turn> = history
            .into_iter()
            .map(|(role, text)| Turn {
                role,
                text,
                image: None,
            })
            .collect();
        turns.append(&mut self.turns);
        self.turns = turns;
        self
    }

    /// Text of the final (prompt) turn.
    pub fn prompt_text(&self) -> &str {
        self.turns.last().map(|t| t.text.as_str()).unwrap_or("")
    }
}

/// External generative model treated as an opaque capability.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Identifier of the model being called.
    fn model_id(&self) -> &str;

    /// Generate a text reply. No retries are attempted.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ChatError>;
}

// =============================================================================
// Gemini REST provider
// =============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

/// Google Gemini `generateContent` over REST.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiProvider {
    /// Build a provider from configuration and a resolved API key.
    ///
    /// Without a key every call fails, which callers surface as a degraded
    /// reply.
    pub fn new(config: &ProviderConfig, api_key: Option<String>) -> Result<Self, ChatError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, self.model)
    }

    fn body(request: &GenerationRequest) -> GeminiRequest {
        let contents = request
            .turns
            .iter()
            .map(|turn| {
                let mut parts = vec![GeminiPart::Text {
                    text: turn.text.clone(),
                }];
                if let Some(image) = &turn.image {
                    parts.push(GeminiPart::Inline {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.to_base64(),
                        },
                    });
                }
                GeminiContent {
                    role: match turn.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    parts,
                }
            })
            .collect();
        GeminiRequest { contents }
    }
}

#[async_trait]
impl GenerativeModel for GeminiProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ChatError::Provider("API key not configured".to_string()))?;

        tracing::debug!(model = %self.model, turns = request.turns.len(), "Calling provider");
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&Self::body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<GeminiErrorBody>(&raw)
                .map(|b| b.error.message)
                .unwrap_or(raw);
            return Err(ChatError::Provider(format!("{}: {}", status, detail)));
        }

        let parsed: GeminiResponse = response.json().await?;
        extract_text(parsed)
    }
}

fn extract_text(response: GeminiResponse) -> Result<String, ChatError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err(ChatError::EmptyResponse)
    } else {
        Ok(text)
    }
}

// =============================================================================
// Mock provider
// =============================================================================

/// Model with a scripted behavior that records every request.
#[derive(Debug)]
pub struct MockModel {
    behavior: MockBehavior,
    requests: Mutex<Vec<GenerationRequest>>,
}

#[derive(Debug)]
enum MockBehavior {
    Answer(String),
    Echo,
    Fail(String),
}

impl MockModel {
    /// Always reply with `text`.
    pub fn answering(text: impl Into<String>) -> Self {
        Self::with(MockBehavior::Answer(text.into()))
    }

    /// Reply with `Echo: <prompt>`.
    pub fn echo() -> Self {
        Self::with(MockBehavior::Echo)
    }

    /// Always fail with a provider error carrying `detail`.
    pub fn failing(detail: impl Into<String>) -> Self {
        Self::with(MockBehavior::Fail(detail.into()))
    }

    fn with(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerativeModel for MockModel {
    fn model_id(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ChatError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        match &self.behavior {
            MockBehavior::Answer(text) => Ok(text.clone()),
            MockBehavior::Echo => Ok(format!("Echo: {}", request.prompt_text())),
            MockBehavior::Fail(detail) => Err(ChatError::Provider(detail.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageAttachment {
        ImageAttachment {
            mime_type: "image/jpeg".to_string(),
            data: b"hello".to_vec(),
        }
    }

    #[test]
    fn test_plain_prompt_body() {
        let body = serde_json::to_value(GeminiProvider::body(&GenerationRequest::prompt("Hi"))).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"contents": [{"role": "user", "parts": [{"text": "Hi"}]}]})
        );
    }

    #[test]
    fn test_image_prompt_body_is_multipart() {
        let request = GenerationRequest::with_image("What is this?", image());
        let body = serde_json::to_value(GeminiProvider::body(&request)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "What is this?");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[1]["inline_data"]["data"], "aGVsbG8=");
    }

    #[test]
    fn test_history_turns_map_assistant_to_model() {
        let request = GenerationRequest::prompt("and now?").after(vec![
            (Role::User, "first".to_string()),
            (Role::Assistant, "answer".to_string()),
        ]);
        assert_eq!(request.prompt_text(), "and now?");
        let body = serde_json::to_value(GeminiProvider::body(&request)).unwrap();
        let roles: Vec<&str> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn test_endpoint_uses_model() {
        let config = ProviderConfig {
            api_base: "https://example.test/".to_string(),
            ..ProviderConfig::default()
        };
        let provider = GeminiProvider::new(&config, Some("key".to_string())).unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(provider.model_id(), "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let config = ProviderConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..ProviderConfig::default()
        };
        let provider = GeminiProvider::new(&config, Some(String::new())).unwrap();
        let err = provider
            .generate(&GenerationRequest::prompt("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "provider error: API key not configured");
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"},{"text":", world"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Hello, world");
    }

    #[test]
    fn test_extract_text_empty_is_error() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(extract_text(response), Err(ChatError::EmptyResponse)));
        let response: GeminiResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert!(matches!(extract_text(response), Err(ChatError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_mock_model_behaviors() {
        let echo = MockModel::echo();
        assert_eq!(
            echo.generate(&GenerationRequest::prompt("ping")).await.unwrap(),
            "Echo: ping"
        );
        assert_eq!(echo.requests().len(), 1);

        let failing = MockModel::failing("quota");
        let err = failing
            .generate(&GenerationRequest::prompt("x"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "provider error: quota");
    }
}
