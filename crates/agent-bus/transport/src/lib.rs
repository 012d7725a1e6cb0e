//! Agent Bus transport boundary.
//!
//! Transport adapters are responsible only for delivery mechanics:
//! moving serialized frames between topics and subscribers. They know
//! nothing about message variants, correlation or persistence.

#![deny(unsafe_code)]

mod memory;

pub use memory::{InMemoryBroker, InMemoryTransport};

use async_trait::async_trait;
use thiserror::Error;

/// A serialized message as it travels on the wire
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportFrame {
    pub topic: String,
    pub payload: String,
}

impl TransportFrame {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A publish/subscribe connection.
///
/// Delivery is to every subscriber of the exact topic. No ordering or
/// exactly-once guarantee is made.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Acquire the underlying connection
    async fn connect(&self) -> Result<(), TransportError>;

    /// Release the connection. Any pending [`next_frame`](Self::next_frame)
    /// returns `None`.
    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Wait for the next frame on a subscribed topic. `None` once the
    /// connection is closed.
    async fn next_frame(&self) -> Option<TransportFrame>;

    fn is_connected(&self) -> bool;
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,

    #[error("Subscriber lagged, {0} frames skipped")]
    Lagged(u64),

    #[error("Transport I/O error: {0}")]
    Io(String),
}
