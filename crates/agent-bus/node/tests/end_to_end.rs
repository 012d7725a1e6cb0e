//! A node with in-process scheduler and proposer agents running the
//! meeting workflow end to end.

use agent_bus_node::{AgentNode, NodeConfig};
use agent_bus_runtime::{handler_fn, AgentBus, HandlerError};
use agent_bus_store::{EscalationStatus, MessageStatus};
use agent_bus_types::{
    topics, value_map, EventMessage, Message, MessageType, RequestMessage, ResponseMessage, Value,
    ValueMap,
};
use std::time::Duration;
use tokio::sync::mpsc;
use workflow_engine::EXECUTE_WORKFLOW_ACTION;
use workflow_types::{ExecutionId, ExecutionStatus, StepId, WorkflowDefinition, WorkflowStep};

/// Answer every request on the agent's topic with `respond`
async fn spawn_agent(
    node: &AgentNode,
    agent_id: &'static str,
    respond: fn(&RequestMessage) -> Result<ValueMap, String>,
) -> AgentBus {
    let bus = node.agent_bus().await.unwrap();
    let topic = topics::agent_request(agent_id);
    bus.subscribe(&[topic.clone()]).await.unwrap();

    let responder = bus.clone();
    bus.register_handler(
        topic,
        handler_fn(move |message| {
            let responder = responder.clone();
            async move {
                let request = message
                    .as_request()
                    .ok_or_else(|| HandlerError::msg("expected a request"))?;
                let response = match respond(request) {
                    Ok(result) => ResponseMessage::success_for(request, agent_id, result),
                    Err(error) => ResponseMessage::failure_for(request, agent_id, error, "REJECTED"),
                };
                responder.try_publish(response).await?;
                Ok(())
            }
        }),
    );
    bus
}

fn find_slot(request: &RequestMessage) -> Result<ValueMap, String> {
    let client = request
        .parameters
        .get("client")
        .and_then(Value::as_str)
        .ok_or("client is required")?;
    Ok(value_map! {
        "best_slot" => "2026-03-02T10:00",
        "duration_minutes" => 45,
        "attendees" => vec![client.to_string(), "account-manager".to_string()],
    })
}

fn create_proposal(request: &RequestMessage) -> Result<ValueMap, String> {
    let details = request
        .parameters
        .get("meeting_details")
        .and_then(Value::as_map)
        .ok_or("meeting_details missing")?;
    let slot = details
        .get("best_slot")
        .and_then(Value::as_str)
        .ok_or("no slot")?;
    Ok(value_map! {
        "proposal_id" => "P-42",
        "summary" => format!("Meeting at {slot}"),
    })
}

fn meeting_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("meeting-setup", "Meeting Setup")
        .with_description("Find a slot, then send a proposal")
        .with_step(
            WorkflowStep::new("S1", "Find Slot", "scheduler", "find_slot")
                .with_input("client", "context.client_name")
                .with_timeout(5),
        )
        .unwrap()
        .with_step(
            WorkflowStep::new("S2", "Create Proposal", "proposer", "create_proposal")
                .depends_on("S1")
                .with_input("meeting_details", "step.S1.*")
                .with_output("proposal_id", "proposal_id")
                .with_output("summary", "summary")
                .with_timeout(5),
        )
        .unwrap()
}

async fn watch(bus: &AgentBus, topic: &str) -> mpsc::UnboundedReceiver<Message> {
    bus.subscribe(&[topic.to_string()]).await.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    bus.register_handler(
        topic,
        handler_fn(move |message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok(())
            }
        }),
    );
    rx
}

async fn start_remotely(client: &AgentBus, context: ValueMap) -> ExecutionId {
    let request = RequestMessage::to_agent("frontend", "orchestrator", EXECUTE_WORKFLOW_ACTION)
        .with_parameter("workflow_id", "meeting-setup")
        .with_parameter("context", context)
        .with_parameter("user_id", "user-9")
        .build()
        .unwrap();
    let response = client.request(request, Some(Duration::from_secs(5))).await;
    assert!(response.success, "start failed: {:?}", response.error);
    response.result.unwrap()["execution_id"]
        .as_str()
        .map(ExecutionId::new)
        .unwrap()
}

#[tokio::test]
async fn meeting_workflow_completes() {
    let node = AgentNode::start(NodeConfig::development()).await.unwrap();
    let _scheduler = spawn_agent(&node, "scheduler", find_slot).await;
    let _proposer = spawn_agent(&node, "proposer", create_proposal).await;
    node.orchestrator()
        .register_workflow(meeting_workflow())
        .await
        .unwrap();

    let client = node.agent_bus().await.unwrap();
    let mut completions = watch(&client, "event.workflow.completed").await;

    let execution_id = start_remotely(&client, value_map! { "client_name" => "Acme" }).await;
    let execution = node
        .orchestrator()
        .wait_for_completion(&execution_id)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.user_id.as_deref(), Some("user-9"));
    assert_eq!(
        execution.step_outputs[&StepId::new("S2")],
        value_map! { "proposal_id" => "P-42", "summary" => "Meeting at 2026-03-02T10:00" }
    );
    let summary = execution.result.clone().unwrap();
    assert_eq!(summary.completed_steps.len(), 2);
    assert!(summary.failed_steps.is_empty());

    let event = tokio::time::timeout(Duration::from_secs(5), completions.recv())
        .await
        .unwrap()
        .unwrap();
    let event: &EventMessage = event.as_event().unwrap();
    assert_eq!(event.event_data["execution_id"], Value::from(execution_id.as_str()));
    assert_eq!(event.event_data["status"], Value::from("completed"));

    // Audit trail: executions, step records and the message log
    let store = node.store();
    let stored = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    let steps = store.get_step_executions(&execution_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].step_id, StepId::new("S1"));
    assert_eq!(steps[1].step_id, StepId::new("S2"));

    let history = store
        .get_conversation_history(execution_id.as_str())
        .await
        .unwrap();
    let requests = history
        .iter()
        .filter(|r| r.message_type == MessageType::Request)
        .count();
    let responses = history
        .iter()
        .filter(|r| r.message_type == MessageType::Response)
        .count();
    assert_eq!(requests, 2);
    assert_eq!(responses, 2);
    assert!(history
        .iter()
        .filter(|r| r.message_type == MessageType::Request)
        .all(|r| r.status == MessageStatus::Delivered));

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_step_is_escalated() {
    let node = AgentNode::start(NodeConfig::development()).await.unwrap();
    let _scheduler = spawn_agent(&node, "scheduler", find_slot).await;
    let _proposer = spawn_agent(&node, "proposer", create_proposal).await;
    node.orchestrator()
        .register_workflow(meeting_workflow())
        .await
        .unwrap();

    let client = node.agent_bus().await.unwrap();
    let mut escalations = watch(&client, "escalation.step_failure").await;

    // No client_name in the context, so the scheduler rejects S1
    let execution_id = start_remotely(&client, ValueMap::new()).await;
    let execution = node
        .orchestrator()
        .wait_for_completion(&execution_id)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error.as_deref(),
        Some("Workflow blocked by failed steps: S1")
    );
    assert!(!execution.completed_steps.contains(&StepId::new("S2")));
    assert!(!execution.failed_steps.contains(&StepId::new("S2")));

    let message = tokio::time::timeout(Duration::from_secs(5), escalations.recv())
        .await
        .unwrap()
        .unwrap();
    let escalation = message.as_escalation().unwrap();
    assert_eq!(escalation.reason, "Step 'Find Slot' failed after 1 attempts");
    assert_eq!(escalation.failed_action.as_deref(), Some("find_slot"));

    let records = node.store().get_escalations(&execution_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, EscalationStatus::Open);
    assert_eq!(records[0].from_agent_id, "scheduler");

    node.shutdown().await.unwrap();
}
