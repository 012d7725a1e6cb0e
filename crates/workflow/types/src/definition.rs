//! Workflow definitions: the declared step graph
//!
//! Steps are declared in order and may only depend on steps declared
//! before them, so a valid definition is acyclic by construction.
//! Definitions are validated when registered, never at run time.

use crate::{InputSource, WorkflowError, WorkflowResult};
use agent_bus_types::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default per-step wait for the agent's response, in seconds
pub const DEFAULT_STEP_TIMEOUT_SECONDS: u64 = 60;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a step, unique within its workflow
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ── Workflow Step ────────────────────────────────────────────────────

/// One unit of work, performed by a single agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub name: String,
    /// Agent that performs the step; requests go to `agent.<agent>.request`
    pub agent: String,
    pub action: String,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    /// Extra attempts allowed after the first failure
    #[serde(default)]
    pub retry: u32,
    /// Input field → literal, `context.<key>` or `step.<id>.<key>`
    #[serde(default)]
    pub input_mapping: BTreeMap<String, Value>,
    /// Result field → published output field
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
}

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECONDS
}

impl WorkflowStep {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        agent: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            agent: agent.into(),
            action: action.into(),
            depends_on: Vec::new(),
            timeout_seconds: DEFAULT_STEP_TIMEOUT_SECONDS,
            retry: 0,
            input_mapping: BTreeMap::new(),
            output_mapping: BTreeMap::new(),
        }
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(StepId::new(step));
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Map an input field from a source expression or literal
    pub fn with_input(mut self, field: impl Into<String>, source: impl Into<Value>) -> Self {
        self.input_mapping.insert(field.into(), source.into());
        self
    }

    /// Publish result field `from` as output field `to`
    pub fn with_output(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.output_mapping.insert(from.into(), to.into());
        self
    }

    /// Parsed input sources, keyed by input field
    pub fn input_sources(&self) -> BTreeMap<&str, InputSource> {
        self.input_mapping
            .iter()
            .map(|(field, raw)| (field.as_str(), InputSource::parse(raw)))
            .collect()
    }

    fn validate_fields(&self) -> WorkflowResult<()> {
        let invalid = |reason: &str| WorkflowError::InvalidStep {
            step: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.0.trim().is_empty() {
            return Err(invalid("step id is empty"));
        }
        if self.agent.trim().is_empty() {
            return Err(invalid("agent is empty"));
        }
        if self.action.trim().is_empty() {
            return Err(invalid("action is empty"));
        }
        if self.timeout_seconds == 0 {
            return Err(invalid("timeout must be positive"));
        }
        Ok(())
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// The blueprint of a workflow
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Only active definitions can be started
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Steps in declaration order
    pub steps: Vec<WorkflowStep>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_active() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow_id: WorkflowId::new(workflow_id),
            name: name.into(),
            description: String::new(),
            is_active: true,
            steps: Vec::new(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Chaining form of [`add_step`](Self::add_step)
    pub fn with_step(mut self, step: WorkflowStep) -> WorkflowResult<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Append a step. Its dependencies must already be declared.
    pub fn add_step(&mut self, step: WorkflowStep) -> WorkflowResult<()> {
        step.validate_fields()?;
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(WorkflowError::DuplicateStepId(step.id));
        }
        for dependency in &step.depends_on {
            if !self.steps.iter().any(|s| &s.id == dependency) {
                return Err(WorkflowError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        self.steps.push(step);
        Ok(())
    }

    /// Get a step by ID
    pub fn get_step(&self, id: &StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Steps that list `id` as a dependency
    pub fn dependents_of(&self, id: &StepId) -> Vec<&WorkflowStep> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(id))
            .collect()
    }

    /// Validate the definition for structural correctness.
    ///
    /// Needed for definitions that did not go through
    /// [`add_step`](Self::add_step), e.g. deserialized ones.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.workflow_id.0.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "Workflow id must not be empty".into(),
            ));
        }

        let all_ids: HashSet<&StepId> = self.steps.iter().map(|s| &s.id).collect();
        let mut declared: HashSet<&StepId> = HashSet::new();

        for step in &self.steps {
            step.validate_fields()?;
            if declared.contains(&step.id) {
                return Err(WorkflowError::DuplicateStepId(step.id.clone()));
            }
            for dependency in &step.depends_on {
                if !all_ids.contains(dependency) {
                    return Err(WorkflowError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                // Backward-only edges rule out cycles, self-loops included
                if !declared.contains(dependency) {
                    return Err(WorkflowError::ForwardDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            for source in step.input_sources().values() {
                if let InputSource::StepOutput { step: source_step, .. }
                | InputSource::StepOutputAll(source_step) = source
                {
                    if !all_ids.contains(source_step) {
                        return Err(WorkflowError::UnknownDependency {
                            step: step.id.clone(),
                            dependency: source_step.clone(),
                        });
                    }
                }
            }
            declared.insert(&step.id);
        }

        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Convenience for building the input bag of a workflow start
pub fn context(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> ValueMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_lead_to_proposal() -> WorkflowDefinition {
        WorkflowDefinition::new("lead-to-proposal", "Lead to Proposal")
            .with_description("Schedule a meeting, then draft a proposal")
            .with_step(
                WorkflowStep::new("S1", "Schedule", "scheduler", "schedule")
                    .with_input("attendees", "context.attendees")
                    .with_timeout(30),
            )
            .unwrap()
            .with_step(
                WorkflowStep::new("S2", "Propose", "proposer", "propose")
                    .depends_on("S1")
                    .with_input("client_name", "context.client_name")
                    .with_input("meeting_details", "step.S1.*")
                    .with_retry(2),
            )
            .unwrap()
    }

    #[test]
    fn test_create_definition() {
        let wf = make_lead_to_proposal();
        assert_eq!(wf.step_count(), 2);
        assert!(wf.is_active);
        assert_eq!(wf.get_step(&StepId::new("S1")).unwrap().timeout_seconds, 30);
        assert_eq!(wf.get_step(&StepId::new("S2")).unwrap().retry, 2);
        assert_eq!(wf.dependents_of(&StepId::new("S1")).len(), 1);
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_step_defaults() {
        let step = WorkflowStep::new("a", "A", "agent", "act");
        assert_eq!(step.timeout_seconds, 60);
        assert_eq!(step.retry, 0);
        assert!(step.depends_on.is_empty());
    }

    #[test]
    fn test_duplicate_step_id() {
        let mut wf = WorkflowDefinition::new("dup", "Dup");
        wf.add_step(WorkflowStep::new("a", "A", "x", "do")).unwrap();
        let result = wf.add_step(WorkflowStep::new("a", "Again", "x", "do"));
        assert!(matches!(result, Err(WorkflowError::DuplicateStepId(_))));
    }

    #[test]
    fn test_unknown_dependency_at_definition_time() {
        let mut wf = WorkflowDefinition::new("bad", "Bad");
        let result = wf.add_step(WorkflowStep::new("b", "B", "x", "do").depends_on("ghost"));
        assert!(matches!(
            result,
            Err(WorkflowError::UnknownDependency { .. })
        ));
        assert_eq!(wf.step_count(), 0);
    }

    #[test]
    fn test_validate_rejects_forward_dependency() {
        // Built by hand, as a deserialized definition would be
        let wf = WorkflowDefinition {
            steps: vec![
                WorkflowStep::new("a", "A", "x", "do").depends_on("b"),
                WorkflowStep::new("b", "B", "x", "do").depends_on("a"),
            ],
            ..WorkflowDefinition::new("cycle", "Cycle")
        };
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::ForwardDependency { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let wf = WorkflowDefinition {
            steps: vec![WorkflowStep::new("a", "A", "x", "do").depends_on("a")],
            ..WorkflowDefinition::new("self", "Self")
        };
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::ForwardDependency { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_mapping_to_unknown_step() {
        let wf = WorkflowDefinition {
            steps: vec![WorkflowStep::new("a", "A", "x", "do").with_input("in", "step.zzz.out")],
            ..WorkflowDefinition::new("map", "Map")
        };
        assert!(matches!(
            wf.validate(),
            Err(WorkflowError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_invalid_step_fields() {
        let mut wf = WorkflowDefinition::new("wf", "Wf");
        let result = wf.add_step(WorkflowStep::new("a", "A", "", "do"));
        assert!(matches!(result, Err(WorkflowError::InvalidStep { .. })));

        let result = wf.add_step(WorkflowStep::new("a", "A", "x", "do").with_timeout(0));
        assert!(matches!(result, Err(WorkflowError::InvalidStep { .. })));
    }

    #[test]
    fn test_deserialize_definition_with_defaults() {
        let json = r#"{
            "workflow_id": "lead-to-proposal",
            "name": "Lead to Proposal",
            "steps": [
                {"id": "S1", "name": "Schedule", "agent": "scheduler", "action": "schedule"},
                {"id": "S2", "name": "Propose", "agent": "proposer", "action": "propose",
                 "depends_on": ["S1"], "retry": 1,
                 "input_mapping": {"meeting_details": "step.S1.*", "tier": 2},
                 "output_mapping": {"proposal_id": "proposal"}}
            ]
        }"#;

        let wf: WorkflowDefinition = serde_json::from_str(json).unwrap();
        assert!(wf.is_active);
        assert!(wf.validate().is_ok());
        let s2 = wf.get_step(&StepId::new("S2")).unwrap();
        assert_eq!(s2.timeout_seconds, 60);
        assert_eq!(s2.input_mapping.get("tier"), Some(&Value::Int(2)));
        assert_eq!(s2.output_mapping.get("proposal_id").unwrap(), "proposal");
    }

    #[test]
    fn test_context_helper() {
        let ctx = context([("client_name", Value::from("Acme"))]);
        assert_eq!(ctx.get("client_name").and_then(Value::as_str), Some("Acme"));
    }
}
