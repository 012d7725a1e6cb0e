//! Ready-set computation
//!
//! A step is ready when it has not finished (either way) and every one
//! of its dependencies completed. Steps behind a failed dependency are
//! never ready, which is what blocks an execution.

use agent_bus_types::ValueMap;
use std::collections::BTreeSet;
use workflow_types::{StepId, WorkflowDefinition, WorkflowStep};

/// How one dispatch of a step ended
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// The step's published (mapped) output
    Succeeded(ValueMap),
    Failed { error: String, code: Option<String> },
}

impl StepOutcome {
    pub fn failed(error: impl Into<String>, code: Option<String>) -> Self {
        Self::Failed {
            error: error.into(),
            code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Steps to dispatch in the next round, in declaration order
pub fn ready_set<'a>(
    definition: &'a WorkflowDefinition,
    completed: &BTreeSet<StepId>,
    failed: &BTreeSet<StepId>,
) -> Vec<&'a WorkflowStep> {
    definition
        .steps
        .iter()
        .filter(|step| !completed.contains(&step.id) && !failed.contains(&step.id))
        .filter(|step| step.depends_on.iter().all(|dep| completed.contains(dep)))
        .collect()
}
