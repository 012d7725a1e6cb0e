//! Step input source expressions
//!
//! An input mapping value is either a literal or a string reference:
//!
//! - `context.<key>`: a field of the workflow's starting context
//! - `step.<id>.<key>`: one output field of an earlier step
//! - `step.<id>.*`: the whole output of an earlier step
//!
//! Any other value, including strings that do not parse as a
//! reference, is passed through as a literal.

use crate::StepId;
use agent_bus_types::Value;

const CONTEXT_PREFIX: &str = "context.";
const STEP_PREFIX: &str = "step.";
const WILDCARD: &str = "*";

/// Parsed form of one input mapping entry
#[derive(Clone, Debug, PartialEq)]
pub enum InputSource {
    Context(String),
    StepOutput { step: StepId, key: String },
    StepOutputAll(StepId),
    Literal(Value),
}

impl InputSource {
    pub fn parse(raw: &Value) -> Self {
        match raw.as_str() {
            Some(expr) => Self::parse_expr(expr).unwrap_or_else(|| Self::Literal(raw.clone())),
            None => Self::Literal(raw.clone()),
        }
    }

    fn parse_expr(expr: &str) -> Option<Self> {
        if let Some(key) = expr.strip_prefix(CONTEXT_PREFIX) {
            if key.is_empty() {
                return None;
            }
            return Some(Self::Context(key.to_string()));
        }

        let rest = expr.strip_prefix(STEP_PREFIX)?;
        let (step, key) = rest.split_once('.')?;
        if step.is_empty() || key.is_empty() {
            return None;
        }
        if key == WILDCARD {
            Some(Self::StepOutputAll(StepId::new(step)))
        } else {
            Some(Self::StepOutput {
                step: StepId::new(step),
                key: key.to_string(),
            })
        }
    }

    /// Step whose output this source reads, if any
    pub fn source_step(&self) -> Option<&StepId> {
        match self {
            Self::StepOutput { step, .. } | Self::StepOutputAll(step) => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context_reference() {
        let source = InputSource::parse(&Value::from("context.client_name"));
        assert_eq!(source, InputSource::Context("client_name".into()));
        assert!(source.source_step().is_none());
    }

    #[test]
    fn test_parse_step_references() {
        assert_eq!(
            InputSource::parse(&Value::from("step.S1.meeting_time")),
            InputSource::StepOutput {
                step: StepId::new("S1"),
                key: "meeting_time".into()
            }
        );
        assert_eq!(
            InputSource::parse(&Value::from("step.S1.*")),
            InputSource::StepOutputAll(StepId::new("S1"))
        );
    }

    #[test]
    fn test_nested_key_is_kept_whole() {
        let source = InputSource::parse(&Value::from("step.S1.meeting.time"));
        assert_eq!(
            source,
            InputSource::StepOutput {
                step: StepId::new("S1"),
                key: "meeting.time".into()
            }
        );
    }

    #[test]
    fn test_non_references_are_literals() {
        for raw in [
            Value::from("hello"),
            Value::from("step.S1"),
            Value::from("context."),
            Value::from(42),
            Value::Bool(true),
        ] {
            assert_eq!(InputSource::parse(&raw), InputSource::Literal(raw.clone()));
        }
    }
}
