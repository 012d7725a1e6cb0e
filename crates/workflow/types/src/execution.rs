//! Workflow executions: one run of a definition
//!
//! A [`WorkflowExecution`] is owned by exactly one driving task. Every
//! transition goes through a method here so that a terminal execution is
//! never mutated again.

use crate::{StepId, WorkflowError, WorkflowId, WorkflowResult};
use agent_bus_types::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Execution Identifier ─────────────────────────────────────────────

/// Unique identifier for a workflow execution
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle of an execution: pending → running → completed | failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one dispatch of one step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Summary ──────────────────────────────────────────────────────────

/// Final result recorded on a finished execution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub completed_steps: Vec<StepId>,
    pub failed_steps: Vec<StepId>,
    pub outputs: BTreeMap<StepId, ValueMap>,
}

// ── Workflow Execution ───────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: ExecutionStatus,
    /// Starting input bag, read by `context.<key>` mappings
    pub context_data: ValueMap,
    pub completed_steps: BTreeSet<StepId>,
    pub failed_steps: BTreeSet<StepId>,
    /// Published (mapped) output of each completed step
    pub step_outputs: BTreeMap<StepId, ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl WorkflowExecution {
    /// A new pending execution with a fresh id and trace id
    pub fn new(workflow_id: WorkflowId, context_data: ValueMap, user_id: Option<String>) -> Self {
        Self {
            execution_id: ExecutionId::generate(),
            workflow_id,
            user_id,
            status: ExecutionStatus::Pending,
            context_data,
            completed_steps: BTreeSet::new(),
            failed_steps: BTreeSet::new(),
            step_outputs: BTreeMap::new(),
            result: None,
            error: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_active(&self) -> WorkflowResult<()> {
        if self.is_terminal() {
            Err(WorkflowError::AlreadyTerminal(self.execution_id.clone()))
        } else {
            Ok(())
        }
    }

    /// pending → running
    pub fn start(&mut self) -> WorkflowResult<()> {
        self.ensure_active()?;
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete_step(&mut self, step: StepId, output: ValueMap) -> WorkflowResult<()> {
        self.ensure_active()?;
        self.failed_steps.remove(&step);
        self.step_outputs.insert(step.clone(), output);
        self.completed_steps.insert(step);
        Ok(())
    }

    /// Mark a step permanently failed (retry budget exhausted)
    pub fn fail_step(&mut self, step: StepId) -> WorkflowResult<()> {
        self.ensure_active()?;
        if !self.completed_steps.contains(&step) {
            self.failed_steps.insert(step);
        }
        Ok(())
    }

    /// Move to the terminal state: completed iff no step failed.
    ///
    /// `error` is recorded as given; a failed outcome without one gets
    /// the blocked-steps message.
    pub fn finish(&mut self, error: Option<String>) -> WorkflowResult<ExecutionStatus> {
        self.ensure_active()?;
        let now = Utc::now();

        self.status = if self.failed_steps.is_empty() && error.is_none() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.error = match (self.status, error) {
            (_, Some(error)) => Some(error),
            (ExecutionStatus::Failed, None) => Some(
                WorkflowError::Blocked {
                    failed_steps: self.failed_steps.iter().cloned().collect(),
                }
                .to_string(),
            ),
            _ => None,
        };
        self.result = Some(self.summary());
        self.completed_at = Some(now);
        let started = self.started_at.unwrap_or(self.created_at);
        self.duration_ms = Some((now - started).num_milliseconds());
        Ok(self.status)
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            completed_steps: self.completed_steps.iter().cloned().collect(),
            failed_steps: self.failed_steps.iter().cloned().collect(),
            outputs: self.step_outputs.clone(),
        }
    }

    /// A field of the starting context
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context_data.get(key)
    }
}

// ── Step Execution ───────────────────────────────────────────────────

/// Audit record of one dispatch of a step. A retry overwrites the
/// record of the previous attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    pub step_name: String,
    pub agent_id: String,
    pub status: StepStatus,
    /// 1-based attempt number
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepExecution {
    pub fn running(
        execution_id: ExecutionId,
        step_id: StepId,
        step_name: impl Into<String>,
        agent_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            execution_id,
            step_id,
            step_name: step_name.into(),
            agent_id: agent_id.into(),
            status: StepStatus::Running,
            attempt,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            output_data: None,
            error: None,
        }
    }

    pub fn succeed(&mut self, output: ValueMap) {
        self.status = StepStatus::Completed;
        self.output_data = Some(output);
        self.stamp_end();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.stamp_end();
    }

    fn stamp_end(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bus_types::value_map;

    fn make_execution() -> WorkflowExecution {
        WorkflowExecution::new(
            WorkflowId::new("lead-to-proposal"),
            value_map! { "client_name" => "Acme" },
            Some("user-1".into()),
        )
    }

    #[test]
    fn test_new_execution_is_pending() {
        let exec = make_execution();
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert!(exec.started_at.is_none());
        assert_eq!(exec.context_value("client_name"), Some(&Value::from("Acme")));
        assert_eq!(exec.execution_id.short().len(), 8);
    }

    #[test]
    fn test_successful_lifecycle() {
        let mut exec = make_execution();
        exec.start().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);

        exec.complete_step(StepId::new("S1"), value_map! { "slot" => "10:00" })
            .unwrap();
        let status = exec.finish(None).unwrap();

        assert_eq!(status, ExecutionStatus::Completed);
        assert!(exec.error.is_none());
        assert!(exec.duration_ms.is_some());
        let summary = exec.result.as_ref().unwrap();
        assert_eq!(summary.completed_steps, vec![StepId::new("S1")]);
        assert!(summary.outputs.contains_key(&StepId::new("S1")));
    }

    #[test]
    fn test_failed_step_fails_execution_with_blocked_message() {
        let mut exec = make_execution();
        exec.start().unwrap();
        exec.fail_step(StepId::new("X")).unwrap();

        assert_eq!(exec.finish(None).unwrap(), ExecutionStatus::Failed);
        assert_eq!(
            exec.error.as_deref(),
            Some("Workflow blocked by failed steps: X")
        );
    }

    #[test]
    fn test_explicit_error_fails_execution() {
        let mut exec = make_execution();
        exec.start().unwrap();
        let status = exec.finish(Some("Workflow has no runnable steps".into())).unwrap();
        assert_eq!(status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_terminal_execution_refuses_mutation() {
        let mut exec = make_execution();
        exec.start().unwrap();
        exec.finish(None).unwrap();

        assert!(matches!(
            exec.complete_step(StepId::new("late"), ValueMap::new()),
            Err(WorkflowError::AlreadyTerminal(_))
        ));
        assert!(matches!(exec.start(), Err(WorkflowError::AlreadyTerminal(_))));
        assert!(matches!(
            exec.finish(None),
            Err(WorkflowError::AlreadyTerminal(_))
        ));
        assert!(!exec.completed_steps.contains(&StepId::new("late")));
    }

    #[test]
    fn test_step_in_at_most_one_set() {
        let mut exec = make_execution();
        exec.start().unwrap();
        exec.complete_step(StepId::new("A"), ValueMap::new()).unwrap();
        exec.fail_step(StepId::new("A")).unwrap();
        assert!(exec.completed_steps.contains(&StepId::new("A")));
        assert!(!exec.failed_steps.contains(&StepId::new("A")));
    }

    #[test]
    fn test_step_execution_records() {
        let mut record = StepExecution::running(
            ExecutionId::new("e1"),
            StepId::new("S1"),
            "Schedule",
            "scheduler",
            1,
        );
        record.fail("Request timeout");
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Request timeout"));
        assert!(record.completed_at.is_some());

        let mut retried = StepExecution::running(
            ExecutionId::new("e1"),
            StepId::new("S1"),
            "Schedule",
            "scheduler",
            2,
        );
        retried.succeed(value_map! { "slot" => "10:00" });
        assert_eq!(retried.status, StepStatus::Completed);
        assert_eq!(retried.attempt, 2);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(serde_json::to_string(&StepStatus::Running).unwrap(), "\"running\"");
    }
}
