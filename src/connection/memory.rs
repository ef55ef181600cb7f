// src/connection/memory.rs

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use regex::Regex;
use tracing::debug;

use crate::connection::{Connection, Dataset, TypeHints};
use crate::errors::{ParadeError, Result};
use crate::types::WriteMode;

/// `select <cols|*> from <table> [limit N]`, case-insensitive.
static SELECT_RE: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*select\s+(?P<cols>\*|[\w\s,]+?)\s+from\s+(?P<table>\w+)(?:\s+limit\s+(?P<limit>\d+))?\s*;?\s*$")
});

/// In-process table store.
///
/// Clones share the same tables, so a test can keep one handle for
/// inspection while the registry hands another to the engine.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    name: String,
    tables: Arc<Mutex<BTreeMap<String, Dataset>>>,
}

impl MemoryConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Seed a table directly (replacing any previous content).
    pub fn insert_table(&self, table: impl Into<String>, dataset: Dataset) -> Result<()> {
        self.lock_tables()?.insert(table.into(), dataset);
        Ok(())
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.lock_tables()?.keys().cloned().collect())
    }

    fn lock_tables(&self) -> Result<MutexGuard<'_, BTreeMap<String, Dataset>>> {
        self.tables.lock().map_err(|_| ParadeError::LockPoisoned)
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self, table: &str) -> Result<Dataset> {
        self.lock_tables()?
            .get(table)
            .cloned()
            .ok_or_else(|| ParadeError::UnknownTable(table.to_string()))
    }

    fn load_query(&self, query: &str) -> Result<Dataset> {
        let re = SELECT_RE
            .as_ref()
            .map_err(|e| ParadeError::InvalidQuery(format!("query grammar unavailable: {e}")))?;
        let caps = re
            .captures(query)
            .ok_or_else(|| ParadeError::InvalidQuery(query.to_string()))?;

        let table = &caps["table"];
        let mut dataset = self.load(table)?;

        let cols = caps["cols"].trim();
        if cols != "*" {
            let wanted: Vec<String> = cols
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            dataset = dataset.project(&wanted)?;
        }

        if let Some(limit) = caps.name("limit") {
            let n: usize = limit
                .as_str()
                .parse()
                .map_err(|_| ParadeError::InvalidQuery(query.to_string()))?;
            dataset.rows.truncate(n);
        }

        debug!(connection = %self.name, table, rows = dataset.len(), "query loaded");
        Ok(dataset)
    }

    fn store(
        &self,
        dataset: &Dataset,
        table: &str,
        mode: WriteMode,
        hints: &TypeHints,
    ) -> Result<()> {
        dataset.check_types(hints)?;

        let mut tables = self.lock_tables()?;
        match mode {
            WriteMode::Fail if tables.contains_key(table) => {
                return Err(ParadeError::TableExists(table.to_string()));
            }
            WriteMode::Fail | WriteMode::Replace => {
                tables.insert(table.to_string(), dataset.clone());
            }
            WriteMode::Append => {
                let target = tables.entry(table.to_string()).or_default();
                for row in &dataset.rows {
                    target.push_row(row.clone());
                }
                for col in &dataset.columns {
                    if !target.columns.contains(col) {
                        target.columns.push(col.clone());
                    }
                }
            }
        }

        debug!(
            connection = %self.name,
            table,
            ?mode,
            rows = dataset.len(),
            "dataset stored"
        );
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock_tables()?.contains_key(table))
    }
}
