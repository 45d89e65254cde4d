use thiserror::Error;

/// Top-level error type for Parley.
///
/// Subsystem crates either return this directly (storage, speech) or define
/// their own error type with a `From` conversion into it (chat), so `?` works
/// across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ParleyError {
    fn from(err: toml::ser::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        ParleyError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(ParleyError, &str)> = vec![
            (
                ParleyError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                ParleyError::Provider("quota exceeded".to_string()),
                "Provider error: quota exceeded",
            ),
            (
                ParleyError::Transcription("no engine".to_string()),
                "Transcription error: no engine",
            ),
            (
                ParleyError::Synthesis("player missing".to_string()),
                "Synthesis error: player missing",
            ),
            (
                ParleyError::Persistence("disk full".to_string()),
                "Persistence error: disk full",
            ),
            (
                ParleyError::InvalidConversationId("../etc".to_string()),
                "Invalid conversation id: \"../etc\"",
            ),
            (ParleyError::ShuttingDown, "Shutdown in progress"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParleyError = io_err.into();
        assert!(matches!(err, ParleyError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let parley_err: ParleyError = err.unwrap_err().into();
        assert!(matches!(parley_err, ParleyError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let parley_err: ParleyError = err.unwrap_err().into();
        assert!(matches!(parley_err, ParleyError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
