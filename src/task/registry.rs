// src/task/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{ParadeError, Result};
use crate::task::TaskDefinition;

/// Name -> task definition map, built once at startup.
///
/// Dependencies are not resolved here: tasks may be registered in any
/// order, and dangling names are reported when a flow is built.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; a second task with the same name is rejected.
    pub fn register(&mut self, task: TaskDefinition) -> Result<()> {
        if self.tasks.contains_key(&task.name) {
            return Err(ParadeError::DuplicateTask(task.name));
        }
        debug!(task = %task.name, kind = task.kind.label(), "task registered");
        self.tasks.insert(task.name.clone(), Arc::new(task));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<TaskDefinition>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| ParadeError::UnknownTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
