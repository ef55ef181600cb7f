// src/scheduler/state.rs

//! Per-run scheduling state.
//!
//! Pure and synchronous: no Tokio, no IO. The runner feeds completions in
//! and gets back which tasks became ready or were cancelled. Every task
//! of the flow is in exactly one of the six sets at all times.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::flow::{Flow, FlowGraph};
use crate::scheduler::SchedulerStep;

/// Which set a task currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    /// Waiting for at least one parent.
    Pending,
    /// All parents succeeded; waiting for a worker slot.
    Ready,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunState {
    parents: BTreeMap<String, BTreeSet<String>>,
    children: BTreeMap<String, BTreeSet<String>>,
    pending: BTreeSet<String>,
    ready: BTreeSet<String>,
    executing: BTreeSet<String>,
    succeeded: BTreeSet<String>,
    failed: BTreeSet<String>,
    cancelled: BTreeSet<String>,
}

impl RunState {
    pub fn new(flow: &Flow) -> Self {
        Self::from_graph(flow.graph())
    }

    /// Roots start ready, everything else pending.
    pub fn from_graph(graph: &FlowGraph) -> Self {
        let mut parents = BTreeMap::new();
        let mut children = BTreeMap::new();
        let mut pending = BTreeSet::new();
        let mut ready = BTreeSet::new();

        for task in graph.tasks() {
            let ps: BTreeSet<String> = graph.parents_of(task).map(str::to_string).collect();
            let cs: BTreeSet<String> = graph.children_of(task).map(str::to_string).collect();
            if ps.is_empty() {
                ready.insert(task.to_string());
            } else {
                pending.insert(task.to_string());
            }
            parents.insert(task.to_string(), ps);
            children.insert(task.to_string(), cs);
        }

        Self {
            parents,
            children,
            pending,
            ready,
            executing: BTreeSet::new(),
            succeeded: BTreeSet::new(),
            failed: BTreeSet::new(),
            cancelled: BTreeSet::new(),
        }
    }

    /// Take the lexicographically smallest ready task and mark it
    /// executing.
    pub fn pop_ready(&mut self) -> Option<String> {
        let task = self.ready.pop_first()?;
        self.executing.insert(task.clone());
        Some(task)
    }

    /// Record that an executing task finished.
    ///
    /// On success, children whose parents have all succeeded become ready.
    /// On failure, every pending descendant is cancelled; each cancellation
    /// lists the direct parents that were failed or cancelled when it
    /// happened.
    pub fn complete(&mut self, task: &str, succeeded: bool) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if !self.executing.remove(task) {
            warn!(task = %task, "completion for a task that is not executing; ignoring");
            return step;
        }

        if succeeded {
            self.succeeded.insert(task.to_string());
            for child in self.children_of(task) {
                if self.pending.contains(&child) && self.parents_succeeded(&child) {
                    self.pending.remove(&child);
                    self.ready.insert(child.clone());
                    step.newly_ready.push(child);
                }
            }
        } else {
            self.failed.insert(task.to_string());
            step.newly_cancelled = self.cancel_descendants(task);
        }

        step.run_just_finished = self.is_finished();
        debug!(
            task = %task,
            succeeded,
            newly_ready = ?step.newly_ready,
            newly_cancelled = step.newly_cancelled.len(),
            "scheduler step"
        );
        step
    }

    fn cancel_descendants(&mut self, root: &str) -> Vec<(String, BTreeSet<String>)> {
        let mut out = Vec::new();
        let mut queue: VecDeque<String> = self.children_of(root).into();

        while let Some(name) = queue.pop_front() {
            if !self.pending.remove(&name) {
                continue;
            }
            let failed_deps: BTreeSet<String> = self
                .parents
                .get(&name)
                .into_iter()
                .flatten()
                .filter(|p| self.failed.contains(*p) || self.cancelled.contains(*p))
                .cloned()
                .collect();
            self.cancelled.insert(name.clone());
            queue.extend(self.children_of(&name));
            out.push((name, failed_deps));
        }
        out
    }

    /// Move every non-terminal task to cancelled; returns them sorted.
    pub fn abort(&mut self) -> Vec<String> {
        let mut aborted: BTreeSet<String> = BTreeSet::new();
        aborted.append(&mut self.pending);
        aborted.append(&mut self.ready);
        aborted.append(&mut self.executing);
        self.cancelled.extend(aborted.iter().cloned());
        aborted.into_iter().collect()
    }

    fn children_of(&self, task: &str) -> Vec<String> {
        self.children
            .get(task)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn parents_succeeded(&self, task: &str) -> bool {
        self.parents
            .get(task)
            .is_none_or(|ps| ps.iter().all(|p| self.succeeded.contains(p)))
    }

    pub fn state_of(&self, task: &str) -> Option<TaskRunState> {
        if self.pending.contains(task) {
            Some(TaskRunState::Pending)
        } else if self.ready.contains(task) {
            Some(TaskRunState::Ready)
        } else if self.executing.contains(task) {
            Some(TaskRunState::Executing)
        } else if self.succeeded.contains(task) {
            Some(TaskRunState::Succeeded)
        } else if self.failed.contains(task) {
            Some(TaskRunState::Failed)
        } else if self.cancelled.contains(task) {
            Some(TaskRunState::Cancelled)
        } else {
            None
        }
    }

    pub fn total(&self) -> usize {
        self.parents.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn executing_len(&self) -> usize {
        self.executing.len()
    }

    pub fn succeeded(&self) -> &BTreeSet<String> {
        &self.succeeded
    }

    pub fn failed(&self) -> &BTreeSet<String> {
        &self.failed
    }

    pub fn cancelled(&self) -> &BTreeSet<String> {
        &self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.succeeded.len() + self.failed.len() + self.cancelled.len() == self.total()
    }

    /// No task failed or was cancelled.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// The six sets are pairwise disjoint and cover exactly the flow's
    /// tasks.
    pub fn check_partition(&self) -> bool {
        let sets = [
            &self.pending,
            &self.ready,
            &self.executing,
            &self.succeeded,
            &self.failed,
            &self.cancelled,
        ];
        let sum: usize = sets.iter().map(|s| s.len()).sum();
        let union: BTreeSet<&String> = sets.iter().flat_map(|s| s.iter()).collect();
        sum == self.total() && union.len() == sum && union.iter().all(|t| self.parents.contains_key(*t))
    }
}
