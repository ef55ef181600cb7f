// src/connection/registry.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connection::{Connection, MemoryConnection};
use crate::errors::{ParadeError, Result};

/// Declarative description of a connection: adapter kind plus free-form
/// options interpreted by the adapter's factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub kind: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn memory() -> Self {
        Self::new("memory")
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Opens connections of one adapter kind.
///
/// Third-party clients are wrapped behind a factory + [`Connection`]
/// implementation; the registry never knows about concrete clients.
pub trait ConnectionFactory: Send + Sync + Debug {
    fn kind(&self) -> &str;

    fn open(&self, name: &str, descriptor: &ConnectionDescriptor) -> anyhow::Result<Arc<dyn Connection>>;
}

/// Factory for the built-in `memory` adapter.
#[derive(Debug, Default)]
pub struct MemoryFactory;

impl ConnectionFactory for MemoryFactory {
    fn kind(&self) -> &str {
        "memory"
    }

    fn open(&self, name: &str, _descriptor: &ConnectionDescriptor) -> anyhow::Result<Arc<dyn Connection>> {
        Ok(Arc::new(MemoryConnection::new(name)))
    }
}

/// Name -> connection mapping.
///
/// Handles are opened lazily on first `get` and cached for the lifetime of
/// the registry. During a run the registry is only read; registration
/// happens between runs.
#[derive(Debug)]
pub struct ConnectionRegistry {
    descriptors: Mutex<BTreeMap<String, ConnectionDescriptor>>,
    handles: Mutex<HashMap<String, Arc<dyn Connection>>>,
    factories: HashMap<String, Arc<dyn ConnectionFactory>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Registry with the built-in `memory` factory.
    pub fn new() -> Self {
        let mut registry = Self {
            descriptors: Mutex::new(BTreeMap::new()),
            handles: Mutex::new(HashMap::new()),
            factories: HashMap::new(),
        };
        registry.register_factory(Arc::new(MemoryFactory));
        registry
    }

    pub fn register_factory(&mut self, factory: Arc<dyn ConnectionFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    /// Register a descriptor under `name`.
    ///
    /// Registering the same descriptor again is a no-op. A different
    /// descriptor replaces the previous one and drops its cached handle.
    pub fn register(&self, name: impl Into<String>, descriptor: ConnectionDescriptor) -> Result<()> {
        let name = name.into();
        let mut descriptors = lock(&self.descriptors)?;

        if descriptors.get(&name) == Some(&descriptor) {
            debug!(connection = %name, "connection already registered; ignoring");
            return Ok(());
        }

        if descriptors.insert(name.clone(), descriptor).is_some() {
            info!(connection = %name, "connection descriptor replaced");
            lock(&self.handles)?.remove(&name);
        }
        Ok(())
    }

    /// Install an already-opened handle, e.g. an adapter built in code.
    pub fn register_handle(&self, handle: Arc<dyn Connection>) -> Result<()> {
        let name = handle.name().to_string();
        lock(&self.descriptors)?
            .entry(name.clone())
            .or_insert_with(|| ConnectionDescriptor::new("handle"));
        lock(&self.handles)?.insert(name, handle);
        Ok(())
    }

    /// Resolve `name` to a handle, opening it on first use.
    ///
    /// Fails with `UnknownConnection` if nothing is registered under `name`
    /// and with `ConnectionUnavailable` if opening the adapter fails.
    /// Acquisition is never retried here.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Connection>> {
        if let Some(handle) = lock(&self.handles)?.get(name) {
            return Ok(Arc::clone(handle));
        }

        let descriptor = lock(&self.descriptors)?
            .get(name)
            .cloned()
            .ok_or_else(|| ParadeError::UnknownConnection(name.to_string()))?;

        let factory = self.factories.get(&descriptor.kind).ok_or_else(|| {
            ParadeError::ConnectionUnavailable {
                name: name.to_string(),
                reason: format!("no adapter for kind '{}'", descriptor.kind),
            }
        })?;

        let handle = factory.open(name, &descriptor).map_err(|e| {
            warn!(connection = %name, kind = %descriptor.kind, error = %e, "failed to open connection");
            ParadeError::ConnectionUnavailable {
                name: name.to_string(),
                reason: format!("{e:#}"),
            }
        })?;

        debug!(connection = %name, kind = %descriptor.kind, "connection opened");

        // Another caller may have raced us; keep the first handle.
        let mut handles = lock(&self.handles)?;
        let handle = handles.entry(name.to_string()).or_insert(handle);
        Ok(Arc::clone(handle))
    }

    /// Registered connection names, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(lock(&self.descriptors)?.keys().cloned().collect())
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| ParadeError::LockPoisoned)
}
