//! In-memory persistence sink for development and testing.
//!
//! Ordering queries (conversation history, step records) follow an
//! insertion sequence number rather than timestamps, so records created
//! within the same clock tick keep their first-seen order.

use crate::model::{EscalationRecord, MessageRecord, MessageStatus};
use crate::traits::PersistenceSink;
use crate::{StoreError, StoreResult};
use agent_bus_types::Message;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use workflow_types::{
    ExecutionId, StepExecution, StepId, WorkflowDefinition, WorkflowExecution, WorkflowId,
};

/// A stored value plus the sequence number of its first insertion.
#[derive(Debug, Clone)]
struct Sequenced<T> {
    seq: u64,
    value: T,
}

/// In-memory persistence sink.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    messages: Arc<DashMap<String, Sequenced<MessageRecord>>>,
    workflows: Arc<DashMap<WorkflowId, WorkflowDefinition>>,
    executions: Arc<DashMap<ExecutionId, WorkflowExecution>>,
    steps: Arc<DashMap<(ExecutionId, StepId), Sequenced<StepExecution>>>,
    escalations: Arc<DashMap<String, Sequenced<EscalationRecord>>>,
    sequence: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with [`StoreError::Unavailable`] while set.
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    /// Look up one logged message by id.
    pub fn get_message(&self, message_id: &str) -> Option<MessageRecord> {
        self.messages.get(message_id).map(|m| m.value.clone())
    }

    pub fn clear(&self) {
        self.messages.clear();
        self.workflows.clear();
        self.executions.clear();
        self.steps.clear();
        self.escalations.clear();
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn sorted_by_seq<T>(mut items: Vec<Sequenced<T>>) -> Vec<T> {
    items.sort_by_key(|item| item.seq);
    items.into_iter().map(|item| item.value).collect()
}

#[async_trait]
impl PersistenceSink for InMemoryStore {
    async fn log_message(&self, message: &Message, status: MessageStatus) -> StoreResult<()> {
        self.check_writable()?;
        let seq = self.next_seq();
        self.messages
            .entry(message.message_id().to_string())
            .and_modify(|existing| existing.value.mark(status))
            .or_insert_with(|| Sequenced {
                seq,
                value: MessageRecord::from_message(message, status),
            });
        Ok(())
    }

    async fn get_conversation_history(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Vec<MessageRecord>> {
        let records = self
            .messages
            .iter()
            .filter(|entry| entry.value.conversation_id.as_deref() == Some(conversation_id))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(sorted_by_seq(records))
    }

    async fn save_workflow(&self, definition: &WorkflowDefinition) -> StoreResult<()> {
        self.check_writable()?;
        definition
            .validate()
            .map_err(|e| StoreError::InvalidDefinition(e.to_string()))?;
        self.workflows
            .insert(definition.workflow_id.clone(), definition.clone());
        Ok(())
    }

    async fn load_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self.workflows.get(workflow_id).map(|w| w.clone()))
    }

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        let mut workflows: Vec<WorkflowDefinition> =
            self.workflows.iter().map(|w| w.value().clone()).collect();
        workflows.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        Ok(workflows)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        self.check_writable()?;
        if self.executions.contains_key(&execution.execution_id) {
            return Err(StoreError::Conflict(format!(
                "execution {} already exists",
                execution.execution_id
            )));
        }
        self.executions
            .insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        self.check_writable()?;
        let mut existing = self
            .executions
            .get_mut(&execution.execution_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("execution {}", execution.execution_id))
            })?;
        *existing = execution.clone();
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> StoreResult<Option<WorkflowExecution>> {
        Ok(self.executions.get(execution_id).map(|e| e.clone()))
    }

    async fn create_step_execution(&self, step: &StepExecution) -> StoreResult<()> {
        self.check_writable()?;
        let seq = self.next_seq();
        self.steps
            .entry((step.execution_id.clone(), step.step_id.clone()))
            .and_modify(|existing| existing.value = step.clone())
            .or_insert_with(|| Sequenced {
                seq,
                value: step.clone(),
            });
        Ok(())
    }

    async fn update_step_execution(&self, step: &StepExecution) -> StoreResult<()> {
        self.check_writable()?;
        let key = (step.execution_id.clone(), step.step_id.clone());
        let mut existing = self.steps.get_mut(&key).ok_or_else(|| {
            StoreError::NotFound(format!(
                "step {} of execution {}",
                step.step_id, step.execution_id
            ))
        })?;
        existing.value = step.clone();
        Ok(())
    }

    async fn get_step_executions(
        &self,
        execution_id: &ExecutionId,
    ) -> StoreResult<Vec<StepExecution>> {
        let records = self
            .steps
            .iter()
            .filter(|entry| &entry.key().0 == execution_id)
            .map(|entry| entry.value().clone())
            .collect();
        Ok(sorted_by_seq(records))
    }

    async fn record_escalation(&self, escalation: &EscalationRecord) -> StoreResult<()> {
        self.check_writable()?;
        let seq = self.next_seq();
        self.escalations.insert(
            escalation.escalation_id.clone(),
            Sequenced {
                seq,
                value: escalation.clone(),
            },
        );
        Ok(())
    }

    async fn get_escalations(
        &self,
        execution_id: &ExecutionId,
    ) -> StoreResult<Vec<EscalationRecord>> {
        let records = self
            .escalations
            .iter()
            .filter(|entry| entry.value.execution_id.as_ref() == Some(execution_id))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(sorted_by_seq(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_bus_types::{
        EscalationMessage, EscalationType, EventMessage, RequestMessage, ResponseMessage,
        Severity, ValueMap,
    };
    use workflow_types::{ExecutionStatus, StepStatus, WorkflowStep};

    fn make_request(conversation: &str) -> RequestMessage {
        RequestMessage::to_agent("orchestrator", "scheduler", "schedule")
            .with_conversation(conversation)
            .build()
            .unwrap()
    }

    fn make_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("wf-1", "Test")
            .with_step(WorkflowStep::new("A", "A", "agent-a", "do"))
            .unwrap()
    }

    #[tokio::test]
    async fn relogging_updates_status_only() {
        let store = InMemoryStore::new();
        let message = Message::from(make_request("conv-1"));

        store.log_message(&message, MessageStatus::Sent).await.unwrap();
        store
            .log_message(&message, MessageStatus::Delivered)
            .await
            .unwrap();

        assert_eq!(store.message_count(), 1);
        let record = store.get_message(message.message_id()).unwrap();
        assert_eq!(record.status, MessageStatus::Delivered);
        assert!(record.delivered_at.is_some());
    }

    #[tokio::test]
    async fn conversation_history_in_first_seen_order() {
        let store = InMemoryStore::new();
        let request = make_request("conv-1");
        let response = ResponseMessage::success_for(&request, "scheduler", ValueMap::new());
        let other = make_request("conv-2");

        store
            .log_message(&Message::from(request.clone()), MessageStatus::Sent)
            .await
            .unwrap();
        store
            .log_message(&Message::from(other), MessageStatus::Sent)
            .await
            .unwrap();
        store
            .log_message(&Message::from(response.clone()), MessageStatus::Sent)
            .await
            .unwrap();
        // Re-logging the request does not move it to the end
        store
            .log_message(&Message::from(request.clone()), MessageStatus::Delivered)
            .await
            .unwrap();

        let history = store.get_conversation_history("conv-1").await.unwrap();
        let ids: Vec<&str> = history.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                request.header.message_id.as_str(),
                response.header.message_id.as_str()
            ]
        );
        assert!(store
            .get_conversation_history("unknown")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn message_without_conversation_is_not_in_history() {
        let store = InMemoryStore::new();
        let event = EventMessage::builder("a", "event.x.y", "y").build().unwrap();
        store
            .log_message(&Message::from(event), MessageStatus::Sent)
            .await
            .unwrap();
        assert_eq!(store.message_count(), 1);
        assert!(store.get_conversation_history("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_workflow_validates() {
        let store = InMemoryStore::new();
        store.save_workflow(&make_definition()).await.unwrap();
        assert!(store
            .load_workflow(&WorkflowId::new("wf-1"))
            .await
            .unwrap()
            .is_some());

        let broken = WorkflowDefinition {
            steps: vec![WorkflowStep::new("B", "B", "agent-b", "do").depends_on("missing")],
            ..WorkflowDefinition::new("wf-2", "Broken")
        };
        let result = store.save_workflow(&broken).await;
        assert!(matches!(result, Err(StoreError::InvalidDefinition(_))));
        assert_eq!(store.list_workflows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn execution_create_update_get() {
        let store = InMemoryStore::new();
        let mut execution =
            WorkflowExecution::new(WorkflowId::new("wf-1"), ValueMap::new(), None);

        store.create_execution(&execution).await.unwrap();
        assert!(matches!(
            store.create_execution(&execution).await,
            Err(StoreError::Conflict(_))
        ));

        execution.start().unwrap();
        store.update_execution(&execution).await.unwrap();
        let loaded = store
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);

        let unknown = WorkflowExecution::new(WorkflowId::new("wf-1"), ValueMap::new(), None);
        assert!(matches!(
            store.update_execution(&unknown).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn retried_step_overwrites_its_record() {
        let store = InMemoryStore::new();
        let exec_id = ExecutionId::new("e1");

        let mut first =
            StepExecution::running(exec_id.clone(), StepId::new("A"), "A", "agent-a", 1);
        store.create_step_execution(&first).await.unwrap();
        first.fail("boom");
        store.update_step_execution(&first).await.unwrap();

        let second = StepExecution::running(exec_id.clone(), StepId::new("B"), "B", "agent-b", 1);
        store.create_step_execution(&second).await.unwrap();

        let retry = StepExecution::running(exec_id.clone(), StepId::new("A"), "A", "agent-a", 2);
        store.create_step_execution(&retry).await.unwrap();

        let records = store.get_step_executions(&exec_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].step_id, StepId::new("A"));
        assert_eq!(records[0].attempt, 2);
        assert_eq!(records[0].status, StepStatus::Running);
        assert_eq!(records[1].step_id, StepId::new("B"));
    }

    #[tokio::test]
    async fn escalations_filtered_by_execution() {
        let store = InMemoryStore::new();
        let escalation = EscalationMessage::builder(
            "orchestrator",
            "escalation.step_failure",
            EscalationType::Error,
            "Step 'A' failed after 1 attempts",
        )
        .with_severity(Severity::High)
        .build()
        .unwrap();

        store
            .record_escalation(&EscalationRecord::open(
                &escalation,
                Some(ExecutionId::new("e1")),
                "agent-a",
            ))
            .await
            .unwrap();

        assert_eq!(
            store
                .get_escalations(&ExecutionId::new("e1"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .get_escalations(&ExecutionId::new("e2"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failing_store_rejects_writes_but_serves_reads() {
        let store = InMemoryStore::new();
        store.save_workflow(&make_definition()).await.unwrap();
        store.fail_writes(true);

        let message = Message::from(make_request("conv-1"));
        assert!(matches!(
            store.log_message(&message, MessageStatus::Sent).await,
            Err(StoreError::Unavailable(_))
        ));
        let execution = WorkflowExecution::new(WorkflowId::new("wf-1"), ValueMap::new(), None);
        assert!(store.create_execution(&execution).await.is_err());
        assert!(store
            .load_workflow(&WorkflowId::new("wf-1"))
            .await
            .unwrap()
            .is_some());

        store.fail_writes(false);
        assert!(store.log_message(&message, MessageStatus::Sent).await.is_ok());
    }
}
