// src/flow/mod.rs

//! Flows: named DAGs of registered tasks.
//!
//! - [`graph`] holds the parent/child adjacency and the canonical
//!   traversal (topological, lexicographic on ties).
//! - [`validate`] checks membership and acyclicity (`petgraph`).
//! - [`store`] persists flow definitions through the state store.

pub mod graph;
pub mod store;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::errors::{ParadeError, Result};
use crate::task::{TaskDefinition, TaskRegistry};

pub use graph::FlowGraph;
pub use store::FlowStore;

/// Child -> parents dependency map.
pub type Deps = BTreeMap<String, BTreeSet<String>>;

/// Validated, in-memory flow.
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    tasks: Vec<String>,
    graph: FlowGraph,
    order: Vec<String>,
    definitions: BTreeMap<String, Arc<TaskDefinition>>,
}

impl Flow {
    /// Build a flow from a task list and explicit edges.
    ///
    /// Dependencies declared on the task definitions are merged into the
    /// explicit edges; such a dependency must also be a member of the flow.
    pub fn new(
        name: impl Into<String>,
        tasks: Vec<String>,
        deps: Deps,
        registry: &TaskRegistry,
    ) -> Result<Self> {
        let name = name.into();
        validate::validate_members(&name, &tasks, &deps, registry)?;

        let mut edges = deps;
        let mut definitions = BTreeMap::new();
        for task in &tasks {
            let def = registry.get(task)?;
            for dep in &def.deps {
                if !tasks.contains(dep) {
                    if !registry.contains(dep) {
                        return Err(ParadeError::UnknownTask(dep.clone()));
                    }
                    return Err(ParadeError::InvalidFlow(format!(
                        "task '{task}' depends on '{dep}', which is not part of flow '{name}'"
                    )));
                }
                edges.entry(task.clone()).or_default().insert(dep.clone());
            }
            definitions.insert(task.clone(), def);
        }
        edges.retain(|_, parents| !parents.is_empty());

        validate::ensure_acyclic(&tasks, &edges)?;

        let graph = FlowGraph::new(&tasks, &edges);
        let order = graph.topological_order();
        Ok(Self {
            name,
            tasks,
            graph,
            order,
            definitions,
        })
    }

    /// One-task flow named after the task; declared dependencies are
    /// ignored.
    pub fn singleton(task: Arc<TaskDefinition>) -> Self {
        let name = task.name.clone();
        let tasks = vec![name.clone()];
        let graph = FlowGraph::new(&tasks, &Deps::new());
        let order = tasks.clone();
        let definitions = BTreeMap::from([(name.clone(), task)]);
        Self {
            name,
            tasks,
            graph,
            order,
            definitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task names in the order they were given.
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// Effective edges, declared dependencies included.
    pub fn deps(&self) -> Deps {
        self.graph.edges()
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn definition(&self, task: &str) -> Option<&Arc<TaskDefinition>> {
        self.definitions.get(task)
    }

    /// Canonical traversal: topological, lexicographic on ties.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn parents_of(&self, task: &str) -> impl Iterator<Item = &str> {
        self.graph.parents_of(task)
    }

    pub fn children_of(&self, task: &str) -> impl Iterator<Item = &str> {
        self.graph.children_of(task)
    }

    pub fn descendants_of(&self, task: &str) -> BTreeSet<String> {
        self.graph.descendants_of(task)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.definitions.contains_key(task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Parse `CHILD->PARENT` edge strings into a dependency map.
pub fn parse_edges<'a>(edges: impl IntoIterator<Item = &'a str>) -> Result<Deps> {
    let mut deps = Deps::new();
    for edge in edges {
        let (child, parent) = edge.split_once("->").ok_or_else(|| {
            ParadeError::InvalidFlow(format!("edge '{edge}' is not of the form CHILD->PARENT"))
        })?;
        let (child, parent) = (child.trim(), parent.trim());
        if child.is_empty() || parent.is_empty() {
            return Err(ParadeError::InvalidFlow(format!(
                "edge '{edge}' has an empty endpoint"
            )));
        }
        deps.entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
    }
    Ok(deps)
}
