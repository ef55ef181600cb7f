// src/flow/graph.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Parent/child adjacency of a flow, keyed by task name.
///
/// Every task of the flow is a key of both maps, possibly with an empty
/// set. Built only from validated input, so it never holds a cycle or a
/// dangling name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowGraph {
    parents: BTreeMap<String, BTreeSet<String>>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl FlowGraph {
    /// Build from the task list and a child -> parents map.
    pub fn new(tasks: &[String], deps: &BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut parents: BTreeMap<String, BTreeSet<String>> = tasks
            .iter()
            .map(|t| (t.clone(), BTreeSet::new()))
            .collect();
        let mut children = parents.clone();

        for (child, ps) in deps {
            for parent in ps {
                parents
                    .entry(child.clone())
                    .or_default()
                    .insert(parent.clone());
                children
                    .entry(parent.clone())
                    .or_default()
                    .insert(child.clone());
            }
        }

        Self { parents, children }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.parents.keys().map(|s| s.as_str())
    }

    pub fn parents_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.parents
            .get(name)
            .into_iter()
            .flat_map(|s| s.iter().map(|p| p.as_str()))
    }

    pub fn children_of(&self, name: &str) -> impl Iterator<Item = &str> {
        self.children
            .get(name)
            .into_iter()
            .flat_map(|s| s.iter().map(|c| c.as_str()))
    }

    /// Tasks with no parents.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.parents
            .iter()
            .filter(|(_, ps)| ps.is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// Child -> parents edges, omitting tasks without parents.
    pub fn edges(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.parents
            .iter()
            .filter(|(_, ps)| !ps.is_empty())
            .map(|(c, ps)| (c.clone(), ps.clone()))
            .collect()
    }

    /// Every task reachable from `name` through child edges.
    pub fn descendants_of(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.children_of(name).collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string()) {
                queue.extend(self.children_of(next));
            }
        }
        seen
    }

    /// Kahn's algorithm; ready ties are broken by task name.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: BTreeMap<&str, usize> = self
            .parents
            .iter()
            .map(|(name, ps)| (name.as_str(), ps.len()))
            .collect();
        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(self.parents.len());
        while let Some(next) = ready.pop_first() {
            order.push(next.to_string());
            for child in self.children_of(next) {
                if let Some(d) = indegree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(child);
                    }
                }
            }
        }
        order
    }
}
