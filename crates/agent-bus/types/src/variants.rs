//! The four message variants and their builders

use crate::header::header_builder_methods;
use crate::topics;
use crate::{MessageError, MessageHeader, MessageResult, MessageType, Value, ValueMap};
use serde::{Deserialize, Serialize};

/// Default wait for a Response, in seconds
pub const DEFAULT_RESPONSE_TIMEOUT_SECONDS: u64 = 60;
/// Default retry allowance advertised on a Request
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Error code of the synthetic Response produced when a Request times out
pub const TIMEOUT_ERROR_CODE: &str = "TIMEOUT";
/// Sender id used for responses synthesized by the bus itself
pub const SYSTEM_AGENT_ID: &str = "system";

fn require(value: &str, message_type: MessageType, field: &'static str) -> MessageResult<()> {
    if value.trim().is_empty() {
        return Err(MessageError::missing(message_type, field));
    }
    Ok(())
}

fn validate_header(header: &MessageHeader, message_type: MessageType) -> MessageResult<()> {
    require(&header.message_id, message_type, "message_id")?;
    require(&header.from_agent_id, message_type, "from_agent_id")?;
    require(&header.topic, message_type, "topic")?;
    Ok(())
}

// ── Request ──────────────────────────────────────────────────────────

/// Ask another agent to perform an action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub action: String,
    #[serde(default)]
    pub parameters: ValueMap,
    #[serde(default = "default_true")]
    pub expect_response: bool,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_true() -> bool {
    true
}

fn default_response_timeout() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_SECONDS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl RequestMessage {
    pub fn builder(
        from_agent_id: impl Into<String>,
        topic: impl Into<String>,
        action: impl Into<String>,
    ) -> RequestBuilder {
        RequestBuilder {
            message: RequestMessage {
                header: MessageHeader::new(from_agent_id, topic),
                action: action.into(),
                parameters: ValueMap::new(),
                expect_response: true,
                response_timeout_seconds: DEFAULT_RESPONSE_TIMEOUT_SECONDS,
                max_retries: DEFAULT_MAX_RETRIES,
                retry_count: 0,
            },
        }
    }

    /// Request addressed to `agent_id` on its conventional request topic
    pub fn to_agent(
        from_agent_id: impl Into<String>,
        agent_id: &str,
        action: impl Into<String>,
    ) -> RequestBuilder {
        Self::builder(from_agent_id, topics::agent_request(agent_id), action).to_agent(agent_id)
    }

    pub fn validate(&self) -> MessageResult<()> {
        validate_header(&self.header, MessageType::Request)?;
        require(&self.action, MessageType::Request, "action")
    }
}

/// Builder for [`RequestMessage`]
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    message: RequestMessage,
}

impl RequestBuilder {
    header_builder_methods!();

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.message.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: ValueMap) -> Self {
        self.message.parameters.extend(parameters);
        self
    }

    pub fn with_response_timeout(mut self, seconds: u64) -> Self {
        self.message.response_timeout_seconds = seconds;
        self
    }

    pub fn fire_and_forget(mut self) -> Self {
        self.message.expect_response = false;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.message.max_retries = max_retries;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.message.retry_count = retry_count;
        self
    }

    pub fn build(self) -> MessageResult<RequestMessage> {
        self.message.validate()?;
        Ok(self.message)
    }
}

// ── Response ─────────────────────────────────────────────────────────

/// Answer to a Request. `result` is present iff `success`,
/// `error`/`error_code` iff not.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ValueMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
}

impl ResponseMessage {
    /// Header for a response to `request`: correlated, same trace and
    /// conversation, parented to the request's span.
    fn header_for(request: &RequestMessage, from_agent_id: impl Into<String>) -> MessageHeader {
        let mut header = MessageHeader::new(
            from_agent_id,
            topics::response_topic_for(&request.header.topic),
        );
        header.to_agent_id = Some(request.header.from_agent_id.clone());
        header.correlation_id = Some(request.header.message_id.clone());
        header.conversation_id = request.header.conversation_id.clone();
        header.trace_id = request.header.trace_id.clone();
        header.parent_span_id = Some(request.header.span_id.clone());
        header
    }

    /// Successful answer to `request`
    pub fn success_for(
        request: &RequestMessage,
        from_agent_id: impl Into<String>,
        result: ValueMap,
    ) -> Self {
        Self {
            header: Self::header_for(request, from_agent_id),
            success: true,
            result: Some(result),
            error: None,
            error_code: None,
            processing_time_ms: None,
        }
    }

    /// Failed answer to `request`
    pub fn failure_for(
        request: &RequestMessage,
        from_agent_id: impl Into<String>,
        error: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            header: Self::header_for(request, from_agent_id),
            success: false,
            result: None,
            error: Some(error.into()),
            error_code: Some(error_code.into()),
            processing_time_ms: None,
        }
    }

    /// The failure the bus synthesizes when nobody answered `request` in time
    pub fn timeout_for(request: &RequestMessage) -> Self {
        Self::failure_for(
            request,
            SYSTEM_AGENT_ID,
            "Request timeout",
            TIMEOUT_ERROR_CODE,
        )
    }

    pub fn with_processing_time(mut self, millis: f64) -> Self {
        self.processing_time_ms = Some(millis);
        self
    }

    pub fn is_timeout(&self) -> bool {
        !self.success && self.error_code.as_deref() == Some(TIMEOUT_ERROR_CODE)
    }

    /// The result bag, empty for failures
    pub fn result_or_empty(&self) -> ValueMap {
        self.result.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> MessageResult<()> {
        validate_header(&self.header, MessageType::Response)?;
        let correlation = self.header.correlation_id.as_deref().unwrap_or_default();
        require(correlation, MessageType::Response, "correlation_id")?;

        if self.success {
            if self.result.is_none() {
                return Err(MessageError::missing(MessageType::Response, "result"));
            }
            if self.error.is_some() || self.error_code.is_some() {
                return Err(MessageError::Inconsistent {
                    message_type: MessageType::Response,
                    reason: "successful response carries an error".into(),
                });
            }
        } else {
            if self.error.is_none() {
                return Err(MessageError::missing(MessageType::Response, "error"));
            }
            if self.result.is_some() {
                return Err(MessageError::Inconsistent {
                    message_type: MessageType::Response,
                    reason: "failed response carries a result".into(),
                });
            }
        }
        Ok(())
    }
}

// ── Event ────────────────────────────────────────────────────────────

/// Fire-and-forget broadcast; no response is expected
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub event_type: String,
    #[serde(default)]
    pub event_data: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_context: Option<ValueMap>,
}

impl EventMessage {
    pub fn builder(
        from_agent_id: impl Into<String>,
        topic: impl Into<String>,
        event_type: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder {
            message: EventMessage {
                header: MessageHeader::new(from_agent_id, topic),
                event_type: event_type.into(),
                event_data: ValueMap::new(),
                source_context: None,
            },
        }
    }

    pub fn validate(&self) -> MessageResult<()> {
        validate_header(&self.header, MessageType::Event)?;
        require(&self.event_type, MessageType::Event, "event_type")
    }
}

/// Builder for [`EventMessage`]
#[derive(Clone, Debug)]
pub struct EventBuilder {
    message: EventMessage,
}

impl EventBuilder {
    header_builder_methods!();

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.message.event_data.insert(key.into(), value.into());
        self
    }

    pub fn with_source_context(mut self, context: ValueMap) -> Self {
        self.message.source_context = Some(context);
        self
    }

    pub fn build(self) -> MessageResult<EventMessage> {
        self.message.validate()?;
        Ok(self.message)
    }
}

// ── Escalation ───────────────────────────────────────────────────────

/// Why an escalation was raised
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    Timeout,
    Error,
    Conflict,
    HumanNeeded,
    ResourceUnavailable,
}

impl EscalationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationType::Timeout => "timeout",
            EscalationType::Error => "error",
            EscalationType::Conflict => "conflict",
            EscalationType::HumanNeeded => "human_needed",
            EscalationType::ResourceUnavailable => "resource_unavailable",
        }
    }
}

impl std::fmt::Display for EscalationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently a human should look at an escalation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automatic recovery failed; intervention is requested
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationMessage {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub escalation_type: EscalationType,
    pub reason: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ValueMap>,
    #[serde(default)]
    pub attempted_solutions: Vec<String>,
    #[serde(default)]
    pub requires_human: bool,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

impl EscalationMessage {
    pub fn builder(
        from_agent_id: impl Into<String>,
        topic: impl Into<String>,
        escalation_type: EscalationType,
        reason: impl Into<String>,
    ) -> EscalationBuilder {
        EscalationBuilder {
            message: EscalationMessage {
                header: MessageHeader::new(from_agent_id, topic),
                escalation_type,
                reason: reason.into(),
                severity: Severity::Medium,
                failed_action: None,
                error_details: None,
                attempted_solutions: Vec::new(),
                requires_human: false,
                suggested_actions: Vec::new(),
            },
        }
    }

    pub fn validate(&self) -> MessageResult<()> {
        validate_header(&self.header, MessageType::Escalation)?;
        require(&self.reason, MessageType::Escalation, "reason")
    }
}

/// Builder for [`EscalationMessage`]
#[derive(Clone, Debug)]
pub struct EscalationBuilder {
    message: EscalationMessage,
}

impl EscalationBuilder {
    header_builder_methods!();

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.message.severity = severity;
        self
    }

    pub fn with_failed_action(mut self, action: impl Into<String>) -> Self {
        self.message.failed_action = Some(action.into());
        self
    }

    pub fn with_error_details(mut self, details: ValueMap) -> Self {
        self.message.error_details = Some(details);
        self
    }

    pub fn with_attempted_solution(mut self, solution: impl Into<String>) -> Self {
        self.message.attempted_solutions.push(solution.into());
        self
    }

    pub fn requires_human(mut self) -> Self {
        self.message.requires_human = true;
        self
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.message.suggested_actions.push(action.into());
        self
    }

    pub fn build(self) -> MessageResult<EscalationMessage> {
        self.message.validate()?;
        Ok(self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_map;

    fn make_request() -> RequestMessage {
        RequestMessage::to_agent("orchestrator", "scheduling-agent", "schedule_meeting")
            .with_parameter("duration_minutes", 60)
            .with_conversation("exec-1")
            .with_trace("trace-1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let request = make_request();
        assert_eq!(request.header.topic, "agent.scheduling-agent.request");
        assert_eq!(
            request.header.to_agent_id.as_deref(),
            Some("scheduling-agent")
        );
        assert!(request.expect_response);
        assert_eq!(request.response_timeout_seconds, 60);
        assert_eq!(request.max_retries, 3);
        assert_eq!(request.retry_count, 0);
    }

    #[test]
    fn test_request_without_action_is_malformed() {
        let result = RequestMessage::builder("orchestrator", "agent.x.request", "  ").build();
        assert!(matches!(
            result,
            Err(MessageError::Malformed {
                message_type: MessageType::Request,
                field: "action"
            })
        ));
    }

    #[test]
    fn test_request_without_topic_is_malformed() {
        let result = RequestMessage::builder("orchestrator", "", "do").build();
        assert!(matches!(
            result,
            Err(MessageError::Malformed { field: "topic", .. })
        ));
    }

    #[test]
    fn test_success_response_preserves_causal_chain() {
        let request = make_request();
        let response = ResponseMessage::success_for(
            &request,
            "scheduling-agent",
            value_map! { "meeting_id" => "m1" },
        );

        assert_eq!(
            response.header.correlation_id.as_deref(),
            Some(request.header.message_id.as_str())
        );
        assert_eq!(response.header.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(response.header.conversation_id.as_deref(), Some("exec-1"));
        assert_eq!(
            response.header.parent_span_id.as_deref(),
            Some(request.header.span_id.as_str())
        );
        assert_ne!(response.header.span_id, request.header.span_id);
        assert_eq!(response.header.topic, "agent.scheduling-agent.response");
        assert_eq!(response.header.to_agent_id.as_deref(), Some("orchestrator"));
        assert!(response.validate().is_ok());
    }

    #[test]
    fn test_timeout_response() {
        let request = make_request();
        let response = ResponseMessage::timeout_for(&request);
        assert!(!response.success);
        assert!(response.is_timeout());
        assert_eq!(response.header.from_agent_id, SYSTEM_AGENT_ID);
        assert_eq!(response.error.as_deref(), Some("Request timeout"));
        assert!(response.result.is_none());
        assert!(response.validate().is_ok());
    }

    #[test]
    fn test_response_presence_rules() {
        let request = make_request();

        let mut ok = ResponseMessage::success_for(&request, "a", ValueMap::new());
        ok.result = None;
        assert!(matches!(
            ok.validate(),
            Err(MessageError::Malformed { field: "result", .. })
        ));

        let mut failed = ResponseMessage::failure_for(&request, "a", "boom", "E1");
        failed.result = Some(ValueMap::new());
        assert!(matches!(
            failed.validate(),
            Err(MessageError::Inconsistent { .. })
        ));

        let mut uncorrelated = ResponseMessage::failure_for(&request, "a", "boom", "E1");
        uncorrelated.header.correlation_id = None;
        assert!(matches!(
            uncorrelated.validate(),
            Err(MessageError::Malformed {
                field: "correlation_id",
                ..
            })
        ));
    }

    #[test]
    fn test_event_builder() {
        let event = EventMessage::builder(
            "scheduling-agent",
            "event.meeting.scheduled",
            "meeting_scheduled",
        )
        .with_data("meeting_id", "m1")
        .build()
        .unwrap();

        assert!(event.header.is_broadcast());
        assert_eq!(event.event_data.get("meeting_id"), Some(&Value::from("m1")));

        let missing = EventMessage::builder("a", "event.x.y", "").build();
        assert!(missing.is_err());
    }

    #[test]
    fn test_escalation_builder() {
        let escalation = EscalationMessage::builder(
            "orchestrator",
            "escalation.step_failure",
            EscalationType::Error,
            "Step 'Schedule' failed after 3 attempts",
        )
        .to_agent("human-supervisor")
        .with_severity(Severity::High)
        .requires_human()
        .with_suggested_action("Contact attendees manually")
        .build()
        .unwrap();

        assert!(escalation.requires_human);
        assert_eq!(escalation.severity, Severity::High);
        assert_eq!(escalation.suggested_actions.len(), 1);

        let json = serde_json::to_value(&escalation).unwrap();
        assert_eq!(json["escalation_type"], "error");
        assert_eq!(json["severity"], "high");

        let missing = EscalationMessage::builder("a", "escalation.x", EscalationType::Timeout, "")
            .build();
        assert!(missing.is_err());
    }
}
