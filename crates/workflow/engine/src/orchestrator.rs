//! Workflow Orchestrator: the main entry point for the workflow engine
//!
//! The orchestrator:
//! 1. Registers workflow definitions
//! 2. Starts executions, directly or on an `execute_workflow` Request
//! 3. Drives each execution round by round over the bus
//! 4. Retries and escalates failed steps
//! 5. Persists every state change and announces completion
//!
//! **CRITICAL**: The orchestrator NEVER performs a step itself. It sends
//! Requests and waits for Responses; the actual work is done by the
//! agents named in the definition.

use crate::scheduler::{self, StepOutcome};
use crate::{mapping, DefinitionRegistry, EscalationEmitter, OrchestratorConfig};
use agent_bus_runtime::{handler_fn, AgentBus, HandlerError};
use agent_bus_store::PersistenceSink;
use agent_bus_types::{
    topics, value_map, EventMessage, Message, RequestMessage, ResponseMessage, ValueMap,
};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use workflow_types::*;

/// Action answered on the orchestrator's request topic
pub const EXECUTE_WORKFLOW_ACTION: &str = "execute_workflow";
/// Error code of a failed `execute_workflow` Response
pub const WORKFLOW_ERROR_CODE: &str = "WORKFLOW_ERROR";
pub const UNKNOWN_ACTION_CODE: &str = "UNKNOWN_ACTION";

/// The Workflow Orchestrator: coordinates, never acts
///
/// Cheap to clone; clones share the bus, the store and the table of
/// running executions.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    bus: AgentBus,
    store: Arc<dyn PersistenceSink>,
    definitions: DefinitionRegistry,
    escalations: EscalationEmitter,
    config: OrchestratorConfig,
    /// Driving task of each running execution started here
    executions: Mutex<HashMap<ExecutionId, JoinHandle<WorkflowExecution>>>,
}

fn store_error(e: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Store(e.to_string())
}

impl WorkflowOrchestrator {
    pub fn new(bus: AgentBus, store: Arc<dyn PersistenceSink>, config: OrchestratorConfig) -> Self {
        let escalations = EscalationEmitter::new(bus.clone(), store.clone(), &config);
        Self {
            inner: Arc::new(OrchestratorInner {
                definitions: DefinitionRegistry::new(store.clone()),
                bus,
                store,
                escalations,
                config,
                executions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &AgentBus {
        &self.inner.bus
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.inner.definitions
    }

    /// Answer `execute_workflow` Requests on `agent.<agent_id>.request`.
    ///
    /// The bus must be connected; it also needs a running listener for
    /// any Request to arrive.
    pub async fn start(&self) -> WorkflowResult<()> {
        let topic = topics::agent_request(&self.inner.config.agent_id);
        self.inner
            .bus
            .subscribe(&[topic.clone()])
            .await
            .map_err(|e| WorkflowError::Bus(e.to_string()))?;

        // The bus owns its handlers, so the handler must not keep us alive
        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        self.inner.bus.register_handler(
            topic.clone(),
            handler_fn(move |message| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => WorkflowOrchestrator { inner }.handle_request(message).await,
                        None => Ok(()),
                    }
                }
            }),
        );

        tracing::info!(
            agent_id = %self.inner.config.agent_id,
            topic = %topic,
            "Workflow orchestrator started"
        );
        Ok(())
    }

    // ── Definition Management ────────────────────────────────────────

    /// Register a workflow definition
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> WorkflowResult<WorkflowId> {
        self.inner.definitions.register(definition).await
    }

    // ── Execution Lifecycle ──────────────────────────────────────────

    /// Start an execution of an active workflow.
    ///
    /// Returns once the pending execution is persisted; the steps run on
    /// a spawned task.
    pub async fn execute_workflow(
        &self,
        workflow_id: &WorkflowId,
        context: ValueMap,
        user_id: Option<String>,
    ) -> WorkflowResult<ExecutionId> {
        let definition = self.inner.definitions.get_active(workflow_id).await?;
        let execution = WorkflowExecution::new(workflow_id.clone(), context, user_id);
        let execution_id = execution.execution_id.clone();

        self.inner
            .store
            .create_execution(&execution)
            .await
            .map_err(store_error)?;

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %workflow_id,
            trace_id = %execution.trace_id,
            steps = definition.step_count(),
            "Workflow execution created"
        );

        // The table lock is held across the spawn so the task's own
        // removal cannot run before the insert.
        let this = self.clone();
        let mut executions = self.inner.executions.lock();
        let handle = tokio::spawn(async move {
            let execution = this.run_execution(definition, execution).await;
            this.inner.executions.lock().remove(&execution.execution_id);
            execution
        });
        executions.insert(execution_id.clone(), handle);
        drop(executions);

        Ok(execution_id)
    }

    /// Wait for an execution started here to finish and return its
    /// final state. Executions that already finished, or were started
    /// elsewhere, are read back from the store.
    pub async fn wait_for_completion(
        &self,
        execution_id: &ExecutionId,
    ) -> WorkflowResult<WorkflowExecution> {
        let handle = self.inner.executions.lock().remove(execution_id);
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| WorkflowError::TaskFailed(format!("{execution_id}: {e}"))),
            None => self.get_execution(execution_id).await,
        }
    }

    /// Wait for every execution started here that is still running
    pub async fn wait_all(&self) -> Vec<WorkflowExecution> {
        let handles: Vec<(ExecutionId, JoinHandle<WorkflowExecution>)> =
            self.inner.executions.lock().drain().collect();

        let mut finished = Vec::with_capacity(handles.len());
        for (execution_id, handle) in handles {
            match handle.await {
                Ok(execution) => finished.push(execution),
                Err(e) => {
                    tracing::error!(execution_id = %execution_id, error = %e, "Execution task failed")
                }
            }
        }
        finished
    }

    /// Ids of executions whose driving task is still running
    pub fn active_executions(&self) -> Vec<ExecutionId> {
        self.inner
            .executions
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Last persisted state of an execution
    pub async fn get_execution(&self, execution_id: &ExecutionId) -> WorkflowResult<WorkflowExecution> {
        self.inner
            .store
            .get_execution(execution_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.clone()))
    }

    // ── Driving Loop ─────────────────────────────────────────────────

    async fn run_execution(
        &self,
        definition: WorkflowDefinition,
        mut execution: WorkflowExecution,
    ) -> WorkflowExecution {
        let error = match self.drive(&definition, &mut execution).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    execution_id = %execution.execution_id,
                    error = %e,
                    "Workflow execution aborted"
                );
                Some(e.to_string())
            }
        };

        match execution.finish(error) {
            Ok(status) => tracing::info!(
                execution_id = %execution.execution_id,
                workflow_id = %execution.workflow_id,
                status = %status,
                completed = execution.completed_steps.len(),
                failed = execution.failed_steps.len(),
                duration_ms = execution.duration_ms.unwrap_or_default(),
                "Workflow execution finished"
            ),
            Err(e) => tracing::warn!(
                execution_id = %execution.execution_id,
                error = %e,
                "Execution finished twice"
            ),
        }

        self.persist(&execution).await;
        self.publish_completion(&definition, &execution).await;
        execution
    }

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
    ) -> WorkflowResult<()> {
        execution.start()?;
        self.persist(execution).await;

        if definition.steps.is_empty() {
            return Err(WorkflowError::NothingToRun);
        }

        // Attempts made so far per step, reset on success
        let mut attempts: HashMap<StepId, u32> = HashMap::new();
        let mut round = 0u32;

        loop {
            let ready = scheduler::ready_set(
                definition,
                &execution.completed_steps,
                &execution.failed_steps,
            );
            if ready.is_empty() {
                if execution.completed_steps.is_empty() && execution.failed_steps.is_empty() {
                    return Err(WorkflowError::NothingToRun);
                }
                if !execution.failed_steps.is_empty() {
                    let done = execution.completed_steps.len() + execution.failed_steps.len();
                    if done < definition.step_count() {
                        tracing::warn!(
                            execution_id = %execution.execution_id,
                            failed = ?execution.failed_steps,
                            unreachable = definition.step_count() - done,
                            "Workflow blocked by failed steps"
                        );
                    }
                }
                break;
            }

            round += 1;
            let step_ids: Vec<&str> = ready.iter().map(|s| s.id.as_str()).collect();
            tracing::debug!(
                execution_id = %execution.execution_id,
                round,
                steps = ?step_ids,
                "Dispatching round"
            );

            let snapshot: &WorkflowExecution = execution;
            let dispatches = ready.into_iter().map(|step| {
                let attempt = attempts.get(&step.id).copied().unwrap_or(0) + 1;
                self.dispatch_step(snapshot, step, attempt)
                    .map(move |outcome| (step, attempt, outcome))
            });
            let results = join_all(dispatches).await;

            for (step, attempt, outcome) in results {
                match outcome {
                    StepOutcome::Succeeded(output) => {
                        attempts.remove(&step.id);
                        execution.complete_step(step.id.clone(), output)?;
                    }
                    StepOutcome::Failed { error, code } => {
                        attempts.insert(step.id.clone(), attempt);
                        if attempt <= step.retry {
                            tracing::info!(
                                execution_id = %execution.execution_id,
                                step_id = %step.id,
                                attempt,
                                retries_left = step.retry - attempt,
                                error = %error,
                                "Step failed, retrying"
                            );
                            continue;
                        }

                        execution.fail_step(step.id.clone())?;
                        if let Err(e) = self
                            .inner
                            .escalations
                            .escalate(execution, step, attempt, &error, code.as_deref())
                            .await
                        {
                            tracing::error!(
                                execution_id = %execution.execution_id,
                                step_id = %step.id,
                                error = %e,
                                "Failed to build escalation"
                            );
                        }
                    }
                }
            }

            self.persist(execution).await;
        }

        Ok(())
    }

    /// One attempt of one step. Never fails: every problem becomes a
    /// [`StepOutcome::Failed`].
    async fn dispatch_step(
        &self,
        execution: &WorkflowExecution,
        step: &WorkflowStep,
        attempt: u32,
    ) -> StepOutcome {
        if attempt > 1 {
            let delay = self.inner.config.retry.delay_for(attempt - 1);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let mut record = StepExecution::running(
            execution.execution_id.clone(),
            step.id.clone(),
            step.name.as_str(),
            step.agent.as_str(),
            attempt,
        );
        if let Err(e) = self.inner.store.create_step_execution(&record).await {
            tracing::error!(
                execution_id = %execution.execution_id,
                step_id = %step.id,
                error = %e,
                "Failed to record step start"
            );
            return StepOutcome::failed(format!("Failed to record step start: {e}"), None);
        }

        let parameters = mapping::resolve_inputs(step, &execution.context_data, &execution.step_outputs);
        let request = RequestMessage::to_agent(
            self.inner.config.agent_id.as_str(),
            &step.agent,
            step.action.as_str(),
        )
        .with_parameters(parameters)
        .with_response_timeout(step.timeout_seconds)
        .with_retry_count(attempt - 1)
        .with_max_retries(step.retry)
        .with_conversation(execution.execution_id.as_str())
        .with_trace(execution.trace_id.as_str())
        .build();

        let request = match request {
            Ok(request) => request,
            Err(e) => {
                record.fail(e.to_string());
                self.update_step(&record).await;
                return StepOutcome::failed(e.to_string(), None);
            }
        };

        tracing::info!(
            execution_id = %execution.execution_id,
            step_id = %step.id,
            agent = %step.agent,
            action = %step.action,
            attempt,
            "Dispatching step"
        );

        let response = self
            .inner
            .bus
            .request(request, Some(Duration::from_secs(step.timeout_seconds)))
            .await;

        let outcome = if response.success {
            let output = mapping::apply_output_mapping(step, &response.result_or_empty());
            record.succeed(output.clone());
            StepOutcome::Succeeded(output)
        } else {
            let error = response
                .error
                .clone()
                .unwrap_or_else(|| "Step failed".to_string());
            tracing::warn!(
                execution_id = %execution.execution_id,
                step_id = %step.id,
                attempt,
                error = %error,
                error_code = response.error_code.as_deref().unwrap_or_default(),
                "Step attempt failed"
            );
            record.fail(error.as_str());
            StepOutcome::failed(error, response.error_code.clone())
        };

        self.update_step(&record).await;
        outcome
    }

    // ── Persistence & Events ─────────────────────────────────────────

    async fn persist(&self, execution: &WorkflowExecution) {
        if let Err(e) = self.inner.store.update_execution(execution).await {
            tracing::error!(
                execution_id = %execution.execution_id,
                error = %e,
                "Failed to persist execution"
            );
        }
    }

    async fn update_step(&self, record: &StepExecution) {
        if let Err(e) = self.inner.store.update_step_execution(record).await {
            tracing::error!(
                execution_id = %record.execution_id,
                step_id = %record.step_id,
                error = %e,
                "Failed to persist step execution"
            );
        }
    }

    async fn publish_completion(&self, definition: &WorkflowDefinition, execution: &WorkflowExecution) {
        let event = EventMessage::builder(
            self.inner.config.agent_id.as_str(),
            self.inner.config.completion_topic.as_str(),
            "workflow_completed",
        )
        .with_conversation(execution.execution_id.as_str())
        .with_trace(execution.trace_id.as_str())
        .with_data("execution_id", execution.execution_id.as_str())
        .with_data("workflow_id", execution.workflow_id.as_str())
        .with_data("status", execution.status.as_str())
        .with_data("completed_steps", execution.completed_steps.len())
        .with_data("failed_steps", execution.failed_steps.len())
        .with_data("total_steps", definition.step_count())
        .build();

        match event {
            Ok(event) => {
                self.inner.bus.publish(event).await;
            }
            Err(e) => tracing::error!(
                execution_id = %execution.execution_id,
                error = %e,
                "Failed to build completion event"
            ),
        }
    }

    // ── Request Handling ─────────────────────────────────────────────

    async fn handle_request(&self, message: Message) -> Result<(), HandlerError> {
        let Some(request) = message.as_request() else {
            return Ok(());
        };
        let agent_id = self.inner.config.agent_id.as_str();

        let response = match request.action.as_str() {
            EXECUTE_WORKFLOW_ACTION => match self.execute_from_request(request).await {
                Ok(execution_id) => ResponseMessage::success_for(
                    request,
                    agent_id,
                    value_map! { "execution_id" => execution_id.as_str() },
                ),
                Err(e) => {
                    tracing::warn!(
                        message_id = %request.header.message_id,
                        error = %e,
                        "Rejected workflow request"
                    );
                    ResponseMessage::failure_for(request, agent_id, e.to_string(), WORKFLOW_ERROR_CODE)
                }
            },
            other => ResponseMessage::failure_for(
                request,
                agent_id,
                format!("Unknown action: {other}"),
                UNKNOWN_ACTION_CODE,
            ),
        };

        if request.expect_response {
            self.inner.bus.try_publish(response).await?;
        }
        Ok(())
    }

    async fn execute_from_request(&self, request: &RequestMessage) -> WorkflowResult<ExecutionId> {
        let params = &request.parameters;
        let workflow_id = params
            .get("workflow_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WorkflowError::ValidationError("Missing workflow_id parameter".into()))?;
        let context = params
            .get("context")
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();
        let user_id = params
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(String::from);

        self.execute_workflow(&WorkflowId::new(workflow_id), context, user_id)
            .await
    }
}
