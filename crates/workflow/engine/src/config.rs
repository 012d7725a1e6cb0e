//! Orchestrator configuration

use crate::RetryPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Agent id the orchestrator sends as and answers requests on
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Topic escalations are published on
    #[serde(default = "default_escalation_topic")]
    pub escalation_topic: String,

    /// Agent escalations are addressed to
    #[serde(default = "default_escalation_target")]
    pub escalation_target: String,

    /// Topic of the event published when an execution finishes
    #[serde(default = "default_completion_topic")]
    pub completion_topic: String,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_agent_id() -> String {
    "orchestrator".to_string()
}

fn default_escalation_topic() -> String {
    "escalation.step_failure".to_string()
}

fn default_escalation_target() -> String {
    "human-supervisor".to_string()
}

fn default_completion_topic() -> String {
    "event.workflow.completed".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            escalation_topic: default_escalation_topic(),
            escalation_target: default_escalation_target(),
            completion_topic: default_completion_topic(),
            retry: RetryPolicy::default(),
        }
    }
}
