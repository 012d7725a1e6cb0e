use agent_bus_runtime::BusError;
use agent_bus_store::StoreError;
use workflow_types::WorkflowError;

/// Errors raised while starting or stopping a node
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Storage backend not compiled in: {0}")]
    UnsupportedStorage(&'static str),

    #[error("Listener task failed: {0}")]
    Listener(String),
}

pub type NodeResult<T> = Result<T, NodeError>;
