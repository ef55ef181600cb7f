// src/flow/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{ParadeError, Result};
use crate::task::TaskRegistry;

/// Check the task list and explicit edges of a flow against the registry.
///
/// - every name appears once in `tasks` (`InvalidFlow`)
/// - every task is registered (`UnknownTask`)
/// - both endpoints of every edge are in `tasks` (`InvalidFlow`, or
///   `UnknownTask` if the name is not registered at all)
pub fn validate_members(
    flow: &str,
    tasks: &[String],
    deps: &BTreeMap<String, BTreeSet<String>>,
    registry: &TaskRegistry,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for task in tasks {
        if !seen.insert(task.as_str()) {
            return Err(ParadeError::InvalidFlow(format!(
                "flow '{flow}' lists task '{task}' more than once"
            )));
        }
        registry.get(task)?;
    }

    for (child, parents) in deps {
        for endpoint in std::iter::once(child).chain(parents.iter()) {
            if seen.contains(endpoint.as_str()) {
                continue;
            }
            if !registry.contains(endpoint) {
                return Err(ParadeError::UnknownTask(endpoint.clone()));
            }
            return Err(ParadeError::InvalidFlow(format!(
                "edge {child}->{} of flow '{flow}' references task '{endpoint}' outside the flow",
                parents.iter().cloned().collect::<Vec<_>>().join(",")
            )));
        }
    }
    Ok(())
}

/// Fail with `CyclicFlow` if the child -> parents map has a cycle
/// (including a self-edge).
pub fn ensure_acyclic(tasks: &[String], deps: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
    // Edge direction: parent -> child.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in tasks {
        graph.add_node(name.as_str());
    }

    for (child, parents) in deps {
        for parent in parents {
            if parent == child {
                return Err(ParadeError::CyclicFlow(format!(
                    "task '{child}' depends on itself"
                )));
            }
            graph.add_edge(parent.as_str(), child.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(ParadeError::CyclicFlow(format!(
            "cycle involving task '{}'",
            cycle.node_id()
        ))),
    }
}
