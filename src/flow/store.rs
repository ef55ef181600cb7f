// src/flow/store.rs

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::{ParadeError, Result};
use crate::flow::{Deps, Flow};
use crate::store::{StateStore, StoredFlow};
use crate::task::TaskRegistry;

/// Persistent flow definitions.
///
/// Flows are validated against the task registry both when created and
/// when loaded, so a flow referring to a task that has since disappeared
/// fails to load with `UnknownTask`.
#[derive(Clone)]
pub struct FlowStore {
    store: Arc<dyn StateStore>,
    tasks: Arc<TaskRegistry>,
}

impl FlowStore {
    pub fn new(store: Arc<dyn StateStore>, tasks: Arc<TaskRegistry>) -> Self {
        Self { store, tasks }
    }

    /// Validate and persist a flow, replacing any flow of the same name.
    pub fn create(&self, name: &str, tasks: Vec<String>, deps: Deps) -> Result<Flow> {
        let flow = Flow::new(name, tasks, deps, &self.tasks)?;
        self.store.save_flow(&StoredFlow {
            name: flow.name().to_string(),
            tasks: flow.tasks().to_vec(),
            deps: flow.deps(),
            created_at: Utc::now(),
        })?;
        info!(flow = %name, tasks = flow.len(), "flow created");
        Ok(flow)
    }

    pub fn load(&self, name: &str) -> Result<Flow> {
        let stored = self
            .store
            .load_flow(name)?
            .ok_or_else(|| ParadeError::UnknownFlow(name.to_string()))?;
        debug!(flow = %name, "flow loaded");
        Flow::new(stored.name, stored.tasks, stored.deps, &self.tasks)
    }

    /// Flow names, lexicographic.
    pub fn list(&self) -> Result<Vec<String>> {
        self.store.list_flows()
    }

    /// Remove a flow; returns whether it existed. Removing a missing flow
    /// is not an error.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let existed = self.store.delete_flow(name)?;
        if existed {
            info!(flow = %name, "flow removed");
        }
        Ok(existed)
    }
}
