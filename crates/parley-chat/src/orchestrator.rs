//! Chat orchestrator: prompt composition, provider call, history update.

use std::sync::Arc;

use parley_core::types::{ConversationId, Message, SUPPORTED_LANGUAGES};
use parley_storage::ConversationCache;

use crate::attachment::ImageAttachment;
use crate::error::ChatError;
use crate::provider::{GenerationRequest, GenerativeModel};

/// Outcome of a provider call as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The provider answered.
    Answer(String),
    /// The provider failed; `message` is the user-facing substitute text.
    Degraded { message: String, cause: String },
}

impl Reply {
    /// Text to show the user, whichever variant this is.
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer(text) => text,
            Reply::Degraded { message, .. } => message,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Reply::Degraded { .. })
    }

    pub fn into_text(self) -> String {
        match self {
            Reply::Answer(text) => text,
            Reply::Degraded { message, .. } => message,
        }
    }
}

/// Central coordinator between the model and the conversation cache.
pub struct ChatOrchestrator {
    model: Arc<dyn GenerativeModel>,
    cache: Arc<ConversationCache>,
    context_messages: usize,
}

impl ChatOrchestrator {
    /// `context_messages` recent history messages are sent along with each
    /// prompt; 0 sends the prompt alone.
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        cache: Arc<ConversationCache>,
        context_messages: usize,
    ) -> Self {
        Self {
            model,
            cache,
            context_messages,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Answer `prompt` within conversation `id`.
    ///
    /// Provider failures come back as [`Reply::Degraded`] and leave the
    /// history untouched. Only an empty prompt is an error.
    pub async fn respond(
        &self,
        prompt: &str,
        id: &ConversationId,
        image: Option<&str>,
    ) -> Result<Reply, ChatError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let history = self.cache.get(id).await?;

        let attachment = image.filter(|uri| !uri.trim().is_empty()).and_then(|uri| {
            ImageAttachment::from_data_uri(uri)
                .map_err(|e| {
                    tracing::error!(conversation_id = %id, error = %e, "Error processing image");
                })
                .ok()
        });
        let request = match attachment {
            Some(image) => GenerationRequest::with_image(prompt, image),
            None => GenerationRequest::prompt(prompt),
        };
        let context_start = history.len().saturating_sub(self.context_messages);
        let request = request.after(
            history[context_start..]
                .iter()
                .map(|m| (m.role, m.content.clone())),
        );

        tracing::info!(
            conversation_id = %id,
            model = self.model.model_id(),
            turns = request.turns.len(),
            "Generating response"
        );

        match self.model.generate(&request).await {
            Ok(text) => {
                self.cache
                    .append(
                        id,
                        Message::user(prompt).stamped(),
                        Message::assistant(text.clone()).stamped(),
                    )
                    .await;
                Ok(Reply::Answer(text))
            }
            Err(e) => {
                tracing::error!(conversation_id = %id, error = %e, "Error generating response");
                Ok(Reply::Degraded {
                    message: format!("Sorry, I encountered an error: {}", e),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Translate `text` into `target_language` (a language code or name).
    ///
    /// Failures come back as [`Reply::Degraded`].
    pub async fn translate(&self, text: &str, target_language: &str) -> Reply {
        let language = language_name(target_language);
        let preview: String = text.chars().take(50).collect();
        tracing::info!(language = %language, text = %preview, "Translating text");

        let prompt = format!(
            "Translate the following text to {}. Return only the translation with no additional text: {}",
            language, text
        );
        match self.model.generate(&GenerationRequest::prompt(prompt)).await {
            Ok(translation) => Reply::Answer(translation.trim().to_string()),
            Err(e) => {
                tracing::error!(language = %language, error = %e, "Translation error");
                Reply::Degraded {
                    message: format!("Translation error: {}", e),
                    cause: e.to_string(),
                }
            }
        }
    }
}

/// Display name of a supported language code; unknown values pass through.
fn language_name(code: &str) -> String {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockModel;
    use parley_core::types::Role;
    use parley_storage::{ConversationStore, PersistenceWorker, SaveMode};

    struct Fixture {
        _dir: tempfile::TempDir,
        _worker: PersistenceWorker,
        cache: Arc<ConversationCache>,
        model: Arc<MockModel>,
        chat: ChatOrchestrator,
    }

    fn fixture(model: MockModel, context_messages: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path()).unwrap();
        let worker = PersistenceWorker::spawn(store.clone(), 8);
        let cache = Arc::new(ConversationCache::new(
            store,
            worker.handle(),
            40,
            SaveMode::Append,
        ));
        let model = Arc::new(model);
        let chat = ChatOrchestrator::new(model.clone(), cache.clone(), context_messages);
        Fixture {
            _dir: dir,
            _worker: worker,
            cache,
            model,
            chat,
        }
    }

    fn id(raw: &str) -> ConversationId {
        ConversationId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_respond_appends_exchange() {
        let f = fixture(MockModel::answering("Paris."), 0);
        let reply = f
            .chat
            .respond("Capital of France?", &id("abc123"), None)
            .await
            .unwrap();
        assert_eq!(reply, Reply::Answer("Paris.".to_string()));

        let history = f.cache.get(&id("abc123")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Capital of France?");
        assert_eq!(history[1].content, "Paris.");
        assert!(history[1].timestamp.is_some());

        let listed = f.cache.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Capital of France?");
    }

    #[tokio::test]
    async fn test_provider_failure_is_absorbed() {
        let f = fixture(MockModel::failing("quota exceeded"), 0);
        let reply = f.chat.respond("Hello", &id("c1"), None).await.unwrap();

        assert!(reply.is_degraded());
        assert_eq!(
            reply.text(),
            "Sorry, I encountered an error: provider error: quota exceeded"
        );
        assert!(f.cache.get(&id("c1")).await.unwrap().is_empty());
        assert!(f.cache.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_call() {
        let f = fixture(MockModel::echo(), 0);
        let err = f.chat.respond("   ", &id("c1"), None).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        assert!(f.model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_image_is_sent_inline() {
        let f = fixture(MockModel::echo(), 0);
        f.chat
            .respond("What is this?", &id("img"), Some("data:image/png;base64,aGVsbG8="))
            .await
            .unwrap();
        let request = &f.model.requests()[0];
        let image = request.turns[0].image.as_ref().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, b"hello");
    }

    #[tokio::test]
    async fn test_bad_image_is_dropped() {
        let f = fixture(MockModel::echo(), 0);
        let reply = f
            .chat
            .respond("Look", &id("img"), Some("data:image/png;base64,@@@"))
            .await
            .unwrap();
        assert_eq!(reply.text(), "Echo: Look");
        assert!(f.model.requests()[0].turns[0].image.is_none());
    }

    #[tokio::test]
    async fn test_context_messages_sent_as_prior_turns() {
        let f = fixture(MockModel::echo(), 2);
        let conv = id("ctx");
        f.chat.respond("one", &conv, None).await.unwrap();
        f.chat.respond("two", &conv, None).await.unwrap();
        f.chat.respond("three", &conv, None).await.unwrap();

        let requests = f.model.requests();
        assert_eq!(requests[0].turns.len(), 1);
        let last = &requests[2];
        let texts: Vec<&str> = last.turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "Echo: two", "three"]);
    }

    #[tokio::test]
    async fn test_without_context_only_prompt_is_sent() {
        let f = fixture(MockModel::echo(), 0);
        let conv = id("noctx");
        f.chat.respond("one", &conv, None).await.unwrap();
        f.chat.respond("two", &conv, None).await.unwrap();
        assert_eq!(f.model.requests()[1].turns.len(), 1);
    }

    #[tokio::test]
    async fn test_translate_prompt_and_trim() {
        let f = fixture(MockModel::answering("  Hola  \n"), 0);
        let reply = f.chat.translate("Hello", "es").await;
        assert_eq!(reply, Reply::Answer("Hola".to_string()));
        assert_eq!(
            f.model.requests()[0].prompt_text(),
            "Translate the following text to Spanish. Return only the translation with no additional text: Hello"
        );
    }

    #[tokio::test]
    async fn test_translate_failure_is_degraded() {
        let f = fixture(MockModel::failing("offline"), 0);
        let reply = f.chat.translate("Hello", "xx").await;
        assert_eq!(reply.text(), "Translation error: provider error: offline");
        assert!(f.model.requests()[0].prompt_text().contains("to xx."));
    }

    #[test]
    fn test_language_name_lookup() {
        assert_eq!(language_name("zh-CN"), "Chinese (Simplified)");
        assert_eq!(language_name("klingon"), "klingon");
    }
}
