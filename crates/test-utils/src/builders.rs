use std::sync::Arc;
use std::time::Duration;

use parade::connection::{Connection, ConnectionRegistry};
use parade::engine::Engine;
use parade::flow::{Flow, parse_edges};
use parade::recorder::{Clock, ManualClock};
use parade::store::{SqliteStore, StateStore};
use parade::task::{TaskDefinition, TaskRegistry};

use crate::fake_executor::DispatchLog;

/// Generic task that does nothing.
pub fn noop_task(name: &str) -> TaskDefinition {
    TaskDefinition::generic(name, |_ctx| async { Ok(()) })
}

/// Generic task that appends its name to `log` when its body runs.
pub fn recording_task(name: &str, log: DispatchLog) -> TaskDefinition {
    TaskDefinition::generic(name, move |ctx| {
        let log = log.clone();
        async move {
            log.push(ctx.task_name());
            Ok(())
        }
    })
}

/// Generic task whose body always fails with `message`.
pub fn failing_task(name: &str, message: &str) -> TaskDefinition {
    let message = message.to_string();
    TaskDefinition::generic(name, move |_ctx| {
        let message = message.clone();
        async move { Err(anyhow::anyhow!(message)) }
    })
}

/// Generic task sleeping for `duration`.
///
/// With `cooperative`, the body returns as soon as its cancellation token
/// fires; otherwise it ignores cancellation.
pub fn sleeping_task(name: &str, duration: Duration, cooperative: bool) -> TaskDefinition {
    TaskDefinition::generic(name, move |ctx| async move {
        if cooperative {
            let token = ctx.cancellation();
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = token.cancelled() => Err(anyhow::anyhow!("cancelled")),
            }
        } else {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    })
}

/// Builder for an engine over an in-memory state database and a manual
/// clock.
pub struct EngineBuilder {
    tasks: TaskRegistry,
    connections: ConnectionRegistry,
    clock: Arc<ManualClock>,
    store: Option<Arc<dyn StateStore>>,
}

impl EngineBuilder {
    /// Clock starts at 2024-01-01T06:00:00Z.
    pub fn new() -> Self {
        Self {
            tasks: TaskRegistry::new(),
            connections: ConnectionRegistry::new(),
            clock: Arc::new(ManualClock::new(crate::ts("2024-01-01T06:00:00Z"))),
            store: None,
        }
    }

    pub fn task(mut self, def: TaskDefinition) -> Self {
        self.tasks.register(def).expect("task names in a test are unique");
        self
    }

    pub fn connection(self, handle: Arc<dyn Connection>) -> Self {
        self.connections
            .register_handle(handle)
            .expect("connection registry lock");
        self
    }

    /// Share a state database between engines (e.g. across "processes").
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub fn build(self) -> (Engine, Arc<ManualClock>) {
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::in_memory().expect("in-memory sqlite")),
        };
        let clock: Arc<dyn Clock> = self.clock.clone();
        let engine = Engine::new(self.tasks, self.connections, store, clock);
        (engine, self.clock)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create and store a flow from task names and `CHILD->PARENT` edges.
pub fn create_flow(engine: &Engine, name: &str, tasks: &[&str], edges: &[&str]) -> Flow {
    let deps = parse_edges(edges.iter().copied()).expect("well-formed edges");
    engine
        .flows()
        .create(name, tasks.iter().map(|t| t.to_string()).collect(), deps)
        .expect("valid flow")
}
