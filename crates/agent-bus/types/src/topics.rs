//! Topic naming convention shared with external agents
//!
//! - `agent.<id>.request` / `agent.<id>.response`
//! - `event.<domain>.<type>`
//! - `escalation.<kind>`

const REQUEST_SUFFIX: &str = ".request";
const RESPONSE_SUFFIX: &str = ".response";

pub fn agent_request(agent_id: &str) -> String {
    format!("agent.{}{}", agent_id, REQUEST_SUFFIX)
}

pub fn agent_response(agent_id: &str) -> String {
    format!("agent.{}{}", agent_id, RESPONSE_SUFFIX)
}

pub fn event(domain: &str, event_type: &str) -> String {
    format!("event.{}.{}", domain, event_type)
}

pub fn escalation(kind: &str) -> String {
    format!("escalation.{}", kind)
}

/// Response topic paired with a request topic. Topics that do not follow
/// the `.request` convention get `.response` appended.
pub fn response_topic_for(request_topic: &str) -> String {
    match request_topic.strip_suffix(REQUEST_SUFFIX) {
        Some(base) => format!("{}{}", base, RESPONSE_SUFFIX),
        None => format!("{}{}", request_topic, RESPONSE_SUFFIX),
    }
}

/// Agent id embedded in an `agent.<id>.request|response` topic
pub fn agent_of(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("agent.")?;
    rest.strip_suffix(REQUEST_SUFFIX)
        .or_else(|| rest.strip_suffix(RESPONSE_SUFFIX))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventions() {
        assert_eq!(agent_request("scheduler"), "agent.scheduler.request");
        assert_eq!(agent_response("scheduler"), "agent.scheduler.response");
        assert_eq!(event("workflow", "completed"), "event.workflow.completed");
        assert_eq!(escalation("step_failure"), "escalation.step_failure");
    }

    #[test]
    fn test_response_topic_for() {
        assert_eq!(
            response_topic_for("agent.proposal-agent.request"),
            "agent.proposal-agent.response"
        );
        assert_eq!(response_topic_for("custom"), "custom.response");
    }

    #[test]
    fn test_agent_of() {
        assert_eq!(agent_of("agent.scheduler.request"), Some("scheduler"));
        assert_eq!(agent_of("agent.scheduler.response"), Some("scheduler"));
        assert_eq!(agent_of("event.workflow.completed"), None);
        assert_eq!(agent_of("agent..request"), None);
    }
}
