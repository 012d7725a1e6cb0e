//! Error types for the Workflow layer

use crate::{ExecutionId, StepId, WorkflowId};
use agent_bus_types::MessageError;

/// Errors that can occur in Workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Workflow is not active: {0}")]
    Inactive(WorkflowId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Duplicate step ID: {0}")]
    DuplicateStepId(StepId),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("Step '{step}' depends on '{dependency}', which is not declared before it")]
    ForwardDependency { step: StepId, dependency: StepId },

    #[error("Invalid step '{step}': {reason}")]
    InvalidStep { step: StepId, reason: String },

    #[error("Workflow blocked by failed steps: {}", format_steps(.failed_steps))]
    Blocked { failed_steps: Vec<StepId> },

    #[error("Workflow has no runnable steps")]
    NothingToRun,

    #[error("Execution already terminal: {0}")]
    AlreadyTerminal(ExecutionId),

    #[error("Persistence error: {0}")]
    Store(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Execution task failed: {0}")]
    TaskFailed(String),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Workflow validation error: {0}")]
    ValidationError(String),
}

fn format_steps(steps: &[StepId]) -> String {
    steps
        .iter()
        .map(|s| s.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
