//! Error types for the chat subsystem.

use parley_core::error::ParleyError;

/// Errors from the chat engine and its provider.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("provider returned no text")]
    EmptyResponse,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Http(err.to_string())
    }
}

impl From<ChatError> for ParleyError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Storage(msg) => ParleyError::Persistence(msg),
            other => ParleyError::Provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::Provider("quota exceeded".to_string()).to_string(),
            "provider error: quota exceeded"
        );
        assert_eq!(ChatError::EmptyResponse.to_string(), "provider returned no text");
        assert_eq!(
            ChatError::InvalidImage("not base64".to_string()).to_string(),
            "invalid image: not base64"
        );
        assert_eq!(
            ChatError::Http("connection refused".to_string()).to_string(),
            "HTTP error: connection refused"
        );
    }

    #[test]
    fn test_chat_error_from_parley_error() {
        let err: ChatError = ParleyError::Persistence("disk full".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_parley_error_from_chat_error() {
        let err: ParleyError = ChatError::Provider("timeout".to_string()).into();
        assert!(matches!(err, ParleyError::Provider(_)));
        let err: ParleyError = ChatError::Storage("gone".to_string()).into();
        assert!(matches!(err, ParleyError::Persistence(_)));
    }
}
