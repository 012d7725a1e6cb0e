//! The wire envelope: one of the four variants, tagged by `message_type`

use crate::{
    EscalationMessage, EventMessage, MessageHeader, MessageResult, MessageType, RequestMessage,
    ResponseMessage,
};
use serde::{Deserialize, Serialize};

/// Any message that travels over the bus.
///
/// Serializes as a flat JSON object whose `message_type` field selects
/// the variant, matching what non-Rust agents publish.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "UPPERCASE")]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
    Event(EventMessage),
    Escalation(EscalationMessage),
}

impl Message {
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::Request(m) => &m.header,
            Message::Response(m) => &m.header,
            Message::Event(m) => &m.header,
            Message::Escalation(m) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Message::Request(m) => &mut m.header,
            Message::Response(m) => &mut m.header,
            Message::Event(m) => &mut m.header,
            Message::Escalation(m) => &mut m.header,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::Event(_) => MessageType::Event,
            Message::Escalation(_) => MessageType::Escalation,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.header().message_id
    }

    pub fn topic(&self) -> &str {
        &self.header().topic
    }

    /// Enforce the field-presence rules of the variant
    pub fn validate(&self) -> MessageResult<()> {
        match self {
            Message::Request(m) => m.validate(),
            Message::Response(m) => m.validate(),
            Message::Event(m) => m.validate(),
            Message::Escalation(m) => m.validate(),
        }
    }

    pub fn as_request(&self) -> Option<&RequestMessage> {
        match self {
            Message::Request(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&ResponseMessage> {
        match self {
            Message::Response(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventMessage> {
        match self {
            Message::Event(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_escalation(&self) -> Option<&EscalationMessage> {
        match self {
            Message::Escalation(m) => Some(m),
            _ => None,
        }
    }

    pub fn to_json(&self) -> MessageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> MessageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<RequestMessage> for Message {
    fn from(m: RequestMessage) -> Self {
        Message::Request(m)
    }
}

impl From<ResponseMessage> for Message {
    fn from(m: ResponseMessage) -> Self {
        Message::Response(m)
    }
}

impl From<EventMessage> for Message {
    fn from(m: EventMessage) -> Self {
        Message::Event(m)
    }
}

impl From<EscalationMessage> for Message {
    fn from(m: EscalationMessage) -> Self {
        Message::Escalation(m)
    }
}
