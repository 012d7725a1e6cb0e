//! Common envelope header shared by every message variant

use crate::ValueMap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default time-to-live for a message, in seconds
pub const DEFAULT_TTL_SECONDS: u64 = 300;

// ── Enumerations ─────────────────────────────────────────────────────

/// Which variant a message is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Request,
    Response,
    Event,
    Escalation,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Event => "EVENT",
            MessageType::Escalation => "ESCALATION",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority. Advisory only: the bus never reorders on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

// ── Header ───────────────────────────────────────────────────────────

/// Routing, correlation and tracing fields common to all variants
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Globally unique, generated at creation
    pub message_id: String,
    pub from_agent_id: String,
    /// `None` means broadcast
    #[serde(default)]
    pub to_agent_id: Option<String>,
    /// Routing key; delivered to every subscriber of this exact topic
    pub topic: String,
    /// For a Response: the `message_id` of the Request it answers
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Groups messages of one interaction, for history queries only
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Fresh per message
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub metadata: ValueMap,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

impl MessageHeader {
    /// Create a header with fresh message and span ids
    pub fn new(from_agent_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from_agent_id: from_agent_id.into(),
            to_agent_id: None,
            topic: topic.into(),
            correlation_id: None,
            conversation_id: None,
            trace_id: None,
            span_id: uuid::Uuid::new_v4().to_string(),
            parent_span_id: None,
            timestamp: Utc::now(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            priority: MessagePriority::Normal,
            metadata: ValueMap::new(),
        }
    }

    /// Whether the message outlived its ttl at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        match self.timestamp.checked_add_signed(Duration::seconds(ttl)) {
            Some(expiry) => expiry < now,
            None => false,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_agent_id.is_none()
    }

    /// Short id for log lines
    pub fn short_id(&self) -> &str {
        &self.message_id[..8.min(self.message_id.len())]
    }
}

/// Builder methods shared by every variant builder
macro_rules! header_builder_methods {
    () => {
        pub fn to_agent(mut self, agent_id: impl Into<String>) -> Self {
            self.message.header.to_agent_id = Some(agent_id.into());
            self
        }

        pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
            self.message.header.conversation_id = Some(conversation_id.into());
            self
        }

        pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
            self.message.header.trace_id = Some(trace_id.into());
            self
        }

        pub fn with_parent_span(mut self, span_id: impl Into<String>) -> Self {
            self.message.header.parent_span_id = Some(span_id.into());
            self
        }

        pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
            self.message.header.correlation_id = Some(correlation_id.into());
            self
        }

        pub fn with_priority(mut self, priority: $crate::MessagePriority) -> Self {
            self.message.header.priority = priority;
            self
        }

        pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
            self.message.header.ttl_seconds = ttl_seconds;
            self
        }

        pub fn with_metadata(
            mut self,
            key: impl Into<String>,
            value: impl Into<$crate::Value>,
        ) -> Self {
            self.message.header.metadata.insert(key.into(), value.into());
            self
        }
    };
}

pub(crate) use header_builder_methods;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header_defaults() {
        let header = MessageHeader::new("orchestrator", "agent.scheduler.request");
        assert_eq!(header.ttl_seconds, 300);
        assert_eq!(header.priority, MessagePriority::Normal);
        assert!(header.is_broadcast());
        assert!(header.correlation_id.is_none());
        assert_ne!(header.message_id, header.span_id);
        assert!(header.short_id().len() <= 8);
    }

    #[test]
    fn test_fresh_ids_per_header() {
        let a = MessageHeader::new("a", "t");
        let b = MessageHeader::new("a", "t");
        assert_ne!(a.message_id, b.message_id);
        assert_ne!(a.span_id, b.span_id);
    }

    #[test]
    fn test_expiry() {
        let mut header = MessageHeader::new("a", "t");
        header.ttl_seconds = 10;
        assert!(!header.is_expired(header.timestamp + Duration::seconds(5)));
        assert!(header.is_expired(header.timestamp + Duration::seconds(11)));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::Escalation).unwrap(),
            "\"ESCALATION\""
        );
        assert_eq!(
            serde_json::to_string(&MessagePriority::Urgent).unwrap(),
            "\"urgent\""
        );
    }
}
