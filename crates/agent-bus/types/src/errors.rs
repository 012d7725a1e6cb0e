//! Error types for the message model

use crate::MessageType;

/// Errors raised while building, validating or decoding messages
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed {message_type} message: missing required field '{field}'")]
    Malformed {
        message_type: MessageType,
        field: &'static str,
    },

    #[error("Inconsistent {message_type} message: {reason}")]
    Inconsistent {
        message_type: MessageType,
        reason: String,
    },

    #[error("Message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessageError {
    pub(crate) fn missing(message_type: MessageType, field: &'static str) -> Self {
        Self::Malformed {
            message_type,
            field,
        }
    }
}

/// Result type alias for message operations
pub type MessageResult<T> = Result<T, MessageError>;
