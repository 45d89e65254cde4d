//! Images attached to a chat message.

use base64::Engine as _;

use crate::error::ChatError;

/// Decoded image ready to be sent inline to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    /// Parse a `data:<mime>;base64,<payload>` URI as produced by the browser.
    ///
    /// A bare base64 payload without the `data:` prefix is accepted as PNG.
    pub fn from_data_uri(uri: &str) -> Result<Self, ChatError> {
        let uri = uri.trim();
        let (mime_type, payload) = match uri.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| ChatError::InvalidImage("data URI has no payload".to_string()))?;
                let mime = header
                    .strip_suffix(";base64")
                    .ok_or_else(|| ChatError::InvalidImage("data URI is not base64".to_string()))?;
                (mime.to_string(), payload)
            }
            None => ("image/png".to_string(), uri),
        };

        if !mime_type.starts_with("image/") {
            return Err(ChatError::InvalidImage(format!(
                "unsupported type {:?}",
                mime_type
            )));
        }
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ChatError::InvalidImage(e.to_string()))?;
        if data.is_empty() {
            return Err(ChatError::InvalidImage("empty image".to_string()));
        }

        Ok(Self { mime_type, data })
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}
