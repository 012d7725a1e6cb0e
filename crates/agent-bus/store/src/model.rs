use agent_bus_types::{
    EscalationMessage, EscalationType, Message, MessageType, Severity, ValueMap,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workflow_types::ExecutionId;

/// Delivery state of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
        }
    }
}

/// One row of the message audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_type: MessageType,
    pub topic: String,
    pub from_agent_id: String,
    pub to_agent_id: Option<String>,
    /// The full message as it travelled on the bus
    pub payload: Message,
    pub metadata: ValueMap,
    pub status: MessageStatus,
    pub trace_id: Option<String>,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build a fresh record for `message`, first seen now.
    pub fn from_message(message: &Message, status: MessageStatus) -> Self {
        let header = message.header();
        let now = Utc::now();
        Self {
            message_id: header.message_id.clone(),
            correlation_id: header.correlation_id.clone(),
            conversation_id: header.conversation_id.clone(),
            message_type: message.message_type(),
            topic: header.topic.clone(),
            from_agent_id: header.from_agent_id.clone(),
            to_agent_id: header.to_agent_id.clone(),
            payload: message.clone(),
            metadata: header.metadata.clone(),
            status,
            trace_id: header.trace_id.clone(),
            span_id: header.span_id.clone(),
            parent_span_id: header.parent_span_id.clone(),
            sent_at: header.timestamp,
            delivered_at: (status == MessageStatus::Delivered).then_some(now),
            created_at: now,
        }
    }

    /// Apply a re-log of the same message: status moves, first-seen time stays.
    ///
    /// Status never moves back: a receiver may log `Delivered` before the
    /// sender gets to log `Sent`.
    pub fn mark(&mut self, status: MessageStatus) {
        if self.status == MessageStatus::Delivered {
            return;
        }
        self.status = status;
        if status == MessageStatus::Delivered {
            self.delivered_at = Some(Utc::now());
        }
    }
}

/// Lifecycle of an escalation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    Open,
    Resolved,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Open => "open",
            EscalationStatus::Resolved => "resolved",
        }
    }
}

/// Durable record of an escalation raised for a workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub escalation_id: String,
    pub execution_id: Option<ExecutionId>,
    /// Agent whose work failed
    pub from_agent_id: String,
    pub escalation_type: EscalationType,
    pub reason: String,
    pub severity: Severity,
    pub error_details: Option<ValueMap>,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
}

impl EscalationRecord {
    /// Record for a published escalation. The escalation's message id
    /// doubles as the record id.
    pub fn open(
        escalation: &EscalationMessage,
        execution_id: Option<ExecutionId>,
        failed_agent: impl Into<String>,
    ) -> Self {
        Self {
            escalation_id: escalation.header.message_id.clone(),
            execution_id,
            from_agent_id: failed_agent.into(),
            escalation_type: escalation.escalation_type,
            reason: escalation.reason.clone(),
            severity: escalation.severity,
            error_details: escalation.error_details.clone(),
            status: EscalationStatus::Open,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bus_types::{EventMessage, RequestMessage};

    #[test]
    fn request_record_copies_header_fields() {
        let request = RequestMessage::to_agent("orchestrator", "scheduler", "schedule")
            .with_conversation("exec-1")
            .with_trace("trace-1")
            .build()
            .unwrap();
        let message = Message::from(request);
        let record = MessageRecord::from_message(&message, MessageStatus::Sent);

        assert_eq!(record.message_id, message.message_id());
        assert_eq!(record.message_type, MessageType::Request);
        assert_eq!(record.conversation_id.as_deref(), Some("exec-1"));
        assert_eq!(record.to_agent_id.as_deref(), Some("scheduler"));
        assert!(record.delivered_at.is_none());
    }

    #[test]
    fn marking_delivered_stamps_time_and_keeps_first_seen() {
        let event = EventMessage::builder("agent-a", "event.test.ping", "ping")
            .build()
            .unwrap();
        let mut record = MessageRecord::from_message(&Message::from(event), MessageStatus::Sent);
        let created = record.created_at;

        record.mark(MessageStatus::Delivered);
        assert_eq!(record.status, MessageStatus::Delivered);
        assert!(record.delivered_at.is_some());
        assert_eq!(record.created_at, created);
    }

    #[test]
    fn late_sent_does_not_undo_delivery() {
        let event = EventMessage::builder("agent-a", "event.test.ping", "ping")
            .build()
            .unwrap();
        let mut record =
            MessageRecord::from_message(&Message::from(event), MessageStatus::Delivered);

        record.mark(MessageStatus::Sent);
        assert_eq!(record.status, MessageStatus::Delivered);
        assert!(record.delivered_at.is_some());
    }

    #[test]
    fn escalation_record_is_open() {
        let escalation = EscalationMessage::builder(
            "orchestrator",
            "escalation.step_failure",
            EscalationType::Error,
            "Step 'Schedule' failed after 1 attempts",
        )
        .with_severity(Severity::High)
        .build()
        .unwrap();
        let record = EscalationRecord::open(&escalation, Some(ExecutionId::new("e1")), "scheduler");

        assert_eq!(record.escalation_id, escalation.header.message_id);
        assert_eq!(record.status, EscalationStatus::Open);
        assert_eq!(record.severity, Severity::High);
        assert_eq!(record.from_agent_id, "scheduler");
    }
}
