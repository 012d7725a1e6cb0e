//! Step input resolution and output shaping

use agent_bus_types::{Value, ValueMap};
use std::collections::BTreeMap;
use workflow_types::{InputSource, StepId, WorkflowStep};

/// Build the request parameters of `step`.
///
/// References that cannot be resolved (unknown context key, step without
/// output, missing field) resolve to [`Value::Null`].
pub fn resolve_inputs(
    step: &WorkflowStep,
    context: &ValueMap,
    outputs: &BTreeMap<StepId, ValueMap>,
) -> ValueMap {
    step.input_sources()
        .into_iter()
        .map(|(field, source)| {
            let value = match source {
                InputSource::Context(key) => lookup(context, &key),
                InputSource::StepOutput { step: source, key } => {
                    outputs.get(&source).and_then(|output| lookup(output, &key))
                }
                InputSource::StepOutputAll(source) => {
                    outputs.get(&source).cloned().map(Value::Map)
                }
                InputSource::Literal(value) => Some(value),
            };
            if value.is_none() {
                tracing::debug!(step_id = %step.id, field, "Input source unresolved, using null");
            }
            (field.to_string(), value.unwrap_or(Value::Null))
        })
        .collect()
}

/// The output a step publishes for its dependents.
///
/// Renames the mapped fields present in `result`. An empty mapping, or
/// one that selects nothing, publishes the whole result.
pub fn apply_output_mapping(step: &WorkflowStep, result: &ValueMap) -> ValueMap {
    if step.output_mapping.is_empty() {
        return result.clone();
    }

    let mapped: ValueMap = step
        .output_mapping
        .iter()
        .filter_map(|(from, to)| lookup(result, from).map(|value| (to.clone(), value)))
        .collect();

    if mapped.is_empty() {
        tracing::debug!(step_id = %step.id, "Output mapping selected nothing, publishing full result");
        return result.clone();
    }
    mapped
}

/// A flat key wins over a dotted path into nested maps.
fn lookup(map: &ValueMap, key: &str) -> Option<Value> {
    if let Some(value) = map.get(key) {
        return Some(value.clone());
    }
    let (head, rest) = key.split_once('.')?;
    map.get(head)?.get_path(rest).cloned()
}
