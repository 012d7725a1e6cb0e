//! Agent Bus node: one process hosting a bus, its persistence sink and
//! the workflow orchestrator
//!
//! # Key Concepts
//!
//! - **NodeConfig**: Layered configuration (defaults, optional file,
//!   `AGENT_BUS__*` environment variables).
//! - **AgentNode**: Builds the store, connects the bus on an in-memory
//!   broker, spawns its listener and starts the orchestrator. Agents
//!   living in the same process attach with [`AgentNode::agent_bus`].
//! - **telemetry**: `tracing` subscriber setup, text or JSON.
//!
//! # Shutdown
//!
//! [`AgentNode::shutdown`] lets running executions finish, then
//! disconnects the bus and joins the listener. In-flight executions are
//! never cancelled.

#![deny(unsafe_code)]

mod config;
mod error;
mod node;
pub mod telemetry;

pub use config::{LoggingConfig, NodeConfig, StorageConfig};
pub use error::{NodeError, NodeResult};
pub use node::AgentNode;
