//! Escalation of steps that exhausted their retries
//!
//! The emitter never decides whether to escalate. The orchestrator calls
//! it once per permanently failed step; the emitter builds the
//! Escalation, publishes it, and keeps the audit record.

use crate::OrchestratorConfig;
use agent_bus_runtime::AgentBus;
use agent_bus_store::{EscalationRecord, PersistenceSink};
use agent_bus_types::{value_map, EscalationMessage, EscalationType, Severity, Value};
use std::sync::Arc;
use workflow_types::{WorkflowExecution, WorkflowResult, WorkflowStep};

const SUGGESTED_ACTIONS: [&str; 3] = [
    "Inspect the failing agent's logs",
    "Check the step's input data",
    "Re-run the workflow once the agent is healthy",
];

/// Builds, publishes and records step-failure escalations
#[derive(Clone)]
pub struct EscalationEmitter {
    bus: AgentBus,
    store: Arc<dyn PersistenceSink>,
    from_agent_id: String,
    topic: String,
    target: String,
}

impl EscalationEmitter {
    pub fn new(bus: AgentBus, store: Arc<dyn PersistenceSink>, config: &OrchestratorConfig) -> Self {
        Self {
            bus,
            store,
            from_agent_id: config.agent_id.clone(),
            topic: config.escalation_topic.clone(),
            target: config.escalation_target.clone(),
        }
    }

    /// The escalation for `step`, which failed `attempts` times
    pub fn build(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        attempts: u32,
        error: &str,
        error_code: Option<&str>,
    ) -> WorkflowResult<EscalationMessage> {
        let details = value_map! {
            "error" => error,
            "step" => step.id.as_str(),
            "execution_id" => execution.execution_id.as_str(),
            "attempts" => attempts,
            "error_code" => Value::from(error_code),
        };

        let mut builder = EscalationMessage::builder(
            self.from_agent_id.as_str(),
            self.topic.as_str(),
            EscalationType::Error,
            format!("Step '{}' failed after {} attempts", step.name, attempts),
        )
        .to_agent(self.target.as_str())
        .with_conversation(execution.execution_id.as_str())
        .with_trace(execution.trace_id.as_str())
        .with_severity(Severity::High)
        .with_failed_action(step.action.as_str())
        .with_error_details(details)
        .requires_human();

        if attempts > 1 {
            builder = builder.with_attempted_solution(format!("Retried {} times", attempts - 1));
        }
        for action in SUGGESTED_ACTIONS {
            builder = builder.with_suggested_action(action);
        }
        Ok(builder.build()?)
    }

    /// Publish the escalation and record it as open.
    ///
    /// Both halves are best effort: a lost escalation must not change
    /// the outcome of the execution.
    pub async fn escalate(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        attempts: u32,
        error: &str,
        error_code: Option<&str>,
    ) -> WorkflowResult<EscalationMessage> {
        let escalation = self.build(execution, step, attempts, error, error_code)?;

        tracing::warn!(
            execution_id = %execution.execution_id,
            step_id = %step.id,
            agent = %step.agent,
            attempts,
            error,
            "Escalating step failure"
        );

        if !self.bus.publish(escalation.clone()).await {
            tracing::error!(
                execution_id = %execution.execution_id,
                step_id = %step.id,
                "Failed to publish escalation"
            );
        }

        let record = EscalationRecord::open(
            &escalation,
            Some(execution.execution_id.clone()),
            step.agent.as_str(),
        );
        if let Err(e) = self.store.record_escalation(&record).await {
            tracing::error!(
                execution_id = %execution.execution_id,
                step_id = %step.id,
                error = %e,
                "Failed to record escalation"
            );
        }

        Ok(escalation)
    }
}
