//! Definition registry: stores and retrieves workflow definitions
//!
//! Definitions live in the persistence sink so that every node sharing
//! a store sees the same set. Registering an id again replaces the
//! previous definition; executions already running keep the copy they
//! loaded at start.

use agent_bus_store::PersistenceSink;
use std::sync::Arc;
use workflow_types::{WorkflowDefinition, WorkflowError, WorkflowId, WorkflowResult};

/// Registry of workflow definitions backed by the store
#[derive(Clone)]
pub struct DefinitionRegistry {
    store: Arc<dyn PersistenceSink>,
}

impl DefinitionRegistry {
    pub fn new(store: Arc<dyn PersistenceSink>) -> Self {
        Self { store }
    }

    /// Register a workflow definition
    ///
    /// Validates the definition before storing. Returns the workflow ID.
    pub async fn register(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowId> {
        definition.validate()?;

        self.store
            .save_workflow(&definition)
            .await
            .map_err(|e| WorkflowError::Store(e.to_string()))?;

        tracing::info!(
            workflow_id = %definition.workflow_id,
            steps = definition.step_count(),
            active = definition.is_active,
            "Workflow definition registered"
        );
        Ok(definition.workflow_id)
    }

    /// Get a definition by ID, active or not
    pub async fn get(&self, id: &WorkflowId) -> WorkflowResult<WorkflowDefinition> {
        self.store
            .load_workflow(id)
            .await
            .map_err(|e| WorkflowError::Store(e.to_string()))?
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    /// Get a definition that may be started
    pub async fn get_active(&self, id: &WorkflowId) -> WorkflowResult<WorkflowDefinition> {
        let definition = self.get(id).await?;
        if !definition.is_active {
            return Err(WorkflowError::Inactive(id.clone()));
        }
        Ok(definition)
    }

    /// List all registered definitions
    pub async fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        self.store
            .list_workflows()
            .await
            .map_err(|e| WorkflowError::Store(e.to_string()))
    }

    /// Check if a definition exists
    pub async fn contains(&self, id: &WorkflowId) -> WorkflowResult<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(WorkflowError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
