use crate::model::{EscalationRecord, MessageRecord, MessageStatus};
use crate::StoreResult;
use agent_bus_types::Message;
use async_trait::async_trait;
use workflow_types::{ExecutionId, StepExecution, WorkflowDefinition, WorkflowExecution, WorkflowId};

/// Durable sink shared by the bus and the orchestrator.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    // ── Message log ──────────────────────────────────────────────────

    /// Upsert keyed by message id. Logging the same message again only
    /// moves its status (and stamps `delivered_at` for `Delivered`).
    async fn log_message(&self, message: &Message, status: MessageStatus) -> StoreResult<()>;

    /// Every logged message of a conversation, in first-seen order.
    async fn get_conversation_history(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Vec<MessageRecord>>;

    // ── Workflow definitions ─────────────────────────────────────────

    /// Validate and save (or replace) a definition.
    async fn save_workflow(&self, definition: &WorkflowDefinition) -> StoreResult<()>;

    async fn load_workflow(&self, workflow_id: &WorkflowId)
        -> StoreResult<Option<WorkflowDefinition>>;

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>>;

    // ── Executions ───────────────────────────────────────────────────

    /// Insert a new execution. Fails if the id is already present.
    async fn create_execution(&self, execution: &WorkflowExecution) -> StoreResult<()>;

    async fn update_execution(&self, execution: &WorkflowExecution) -> StoreResult<()>;

    async fn get_execution(&self, execution_id: &ExecutionId)
        -> StoreResult<Option<WorkflowExecution>>;

    // ── Step executions ──────────────────────────────────────────────

    /// Record a dispatch. Keyed by `(execution_id, step_id)`, so a retry
    /// overwrites the record of the previous attempt.
    async fn create_step_execution(&self, step: &StepExecution) -> StoreResult<()>;

    async fn update_step_execution(&self, step: &StepExecution) -> StoreResult<()>;

    /// Step records of an execution, in first-dispatch order.
    async fn get_step_executions(&self, execution_id: &ExecutionId)
        -> StoreResult<Vec<StepExecution>>;

    // ── Escalations ──────────────────────────────────────────────────

    async fn record_escalation(&self, escalation: &EscalationRecord) -> StoreResult<()>;

    async fn get_escalations(&self, execution_id: &ExecutionId)
        -> StoreResult<Vec<EscalationRecord>>;
}
