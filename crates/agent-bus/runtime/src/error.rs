//! Error types for the bus runtime

use agent_bus_store::StoreError;
use agent_bus_transport::TransportError;
use agent_bus_types::MessageError;
use thiserror::Error;

/// Error code of the failure returned when a request id is already pending
pub const DUPLICATE_REQUEST_CODE: &str = "DUPLICATE_REQUEST";
/// Error code of the failure returned when a request could not be published
pub const PUBLISH_FAILED_CODE: &str = "PUBLISH_FAILED";

/// Errors raised by bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus not connected")]
    NotConnected,

    #[error("Bus is already listening")]
    AlreadyListening,

    #[error("Request {0} is already pending")]
    DuplicatePending(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid message: {0}")]
    Message(#[from] MessageError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Failure reported by a message handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}
