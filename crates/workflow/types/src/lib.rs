//! Workflow Domain Types for the Agent Bus
//!
//! A workflow is an ordered list of steps. Each step names the agent
//! that performs it, the action to request, and the steps it depends
//! on. Dependencies may only point backwards, so every definition is a
//! DAG by construction.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: The declared steps of a workflow and whether
//!   it may currently be started.
//! - **WorkflowStep**: One unit of work: agent, action, dependencies,
//!   timeout, retry budget and field mappings.
//! - **InputSource**: Where a step input comes from: a literal, the
//!   workflow context, or a prior step's output.
//! - **WorkflowExecution**: A single run of a definition, owned by one
//!   orchestrator task.
//! - **StepExecution**: The audit record of one dispatch of one step.

#![deny(unsafe_code)]

mod definition;
mod errors;
mod execution;
mod mapping;

pub use definition::*;
pub use errors::*;
pub use execution::*;
pub use mapping::*;
