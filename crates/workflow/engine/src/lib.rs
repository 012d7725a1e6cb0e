//! Workflow Orchestrator for the Agent Bus
//!
//! The orchestrator runs workflow definitions against live agents. It
//! sends each step as a Request over the bus, waits for the Response,
//! and advances the execution round by round.
//!
//! # Key Principle
//!
//! **The orchestrator coordinates, it never performs a step itself.**
//!
//! Every unit of work is a Request to the agent named by the step. The
//! orchestrator only decides what runs next, what to retry, and when a
//! human has to be told.
//!
//! # Architecture
//!
//! The [`WorkflowOrchestrator`] composes specialized components:
//!
//! - [`DefinitionRegistry`]: Validates, stores and loads definitions
//! - [`scheduler`]: Computes the ready set of each round
//! - [`mapping`]: Resolves step inputs and shapes step outputs
//! - [`RetryPolicy`]: Delay before a failed step is dispatched again
//! - [`EscalationEmitter`]: Raises and records escalations for steps
//!   that exhausted their retries
//!
//! # Execution model
//!
//! One task drives each execution. A round dispatches every ready step
//! concurrently and waits for all of them before computing the next
//! ready set. A failed step with retry budget left rejoins the next
//! round; once the budget is gone it is marked failed and escalated, and
//! every step depending on it is never dispatched.

#![deny(unsafe_code)]

mod config;
pub mod definition_registry;
pub mod escalation;
pub mod mapping;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;

pub use config::OrchestratorConfig;
pub use definition_registry::DefinitionRegistry;
pub use escalation::EscalationEmitter;
pub use orchestrator::{
    WorkflowOrchestrator, EXECUTE_WORKFLOW_ACTION, UNKNOWN_ACTION_CODE, WORKFLOW_ERROR_CODE,
};
pub use scheduler::StepOutcome;
pub use retry::{Backoff, RetryPolicy};
