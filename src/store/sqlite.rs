// src/store/sqlite.rs

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::errors::{ErrorKind, ParadeError, Result};
use crate::recorder::{AttemptId, Attributes, RunId, RunOutcome, RunRecord, TaskRecord};
use crate::store::schema;
use crate::store::{StateStore, StoredFlow};
use crate::task::TaskState;

const RECORD_COLUMNS: &str = "attempt_id, run_id, task_name, flow_id, flow_name, state, \
     began_at, ended_at, outcome, attributes, error_message";

/// SQLite-backed [`StateStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a state database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        debug!(path = %path.display(), "state database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (tests, one-shot runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ParadeError::LockPoisoned)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn unknown_value(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    conversion_error(
        idx,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown {what}: {value}"),
        ),
    )
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let state: String = row.get(5)?;
    let state = TaskState::parse(&state).ok_or_else(|| unknown_value(5, "task state", &state))?;

    let outcome: Option<String> = row.get(8)?;
    let outcome = match outcome {
        Some(code) => {
            Some(ErrorKind::parse(&code).ok_or_else(|| unknown_value(8, "outcome", &code))?)
        }
        None => None,
    };

    let attributes: String = row.get(9)?;
    let attributes: Attributes =
        serde_json::from_str(&attributes).map_err(|e| conversion_error(9, e))?;

    Ok(TaskRecord {
        attempt_id: row.get(0)?,
        run_id: row.get(1)?,
        task_name: row.get(2)?,
        flow_id: row.get(3)?,
        flow_name: row.get(4)?,
        state,
        began_at: opt_ts(row, 6)?,
        ended_at: opt_ts(row, 7)?,
        outcome,
        attributes,
        error_message: row.get(10)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let started_at: String = row.get(2)?;
    let outcome: Option<String> = row.get(4)?;
    let outcome = match outcome {
        Some(s) => Some(RunOutcome::parse(&s).ok_or_else(|| unknown_value(4, "run outcome", &s))?),
        None => None,
    };
    Ok(RunRecord {
        run_id: row.get(0)?,
        flow_name: row.get(1)?,
        started_at: parse_ts(2, &started_at)?,
        ended_at: opt_ts(row, 3)?,
        outcome,
    })
}

impl StateStore for SqliteStore {
    fn save_flow(&self, flow: &StoredFlow) -> Result<()> {
        let tasks = serde_json::to_string(&flow.tasks)?;
        let deps = serde_json::to_string(&flow.deps)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO flows (name, tasks, deps, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET tasks = ?2, deps = ?3, created_at = ?4",
            params![flow.name, tasks, deps, fmt_ts(flow.created_at)],
        )?;
        Ok(())
    }

    fn load_flow(&self, name: &str) -> Result<Option<StoredFlow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT name, tasks, deps, created_at FROM flows WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, tasks, deps, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredFlow {
            name,
            tasks: serde_json::from_str(&tasks)?,
            deps: serde_json::from_str(&deps)?,
            created_at: parse_ts(3, &created_at)?,
        }))
    }

    fn list_flows(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM flows ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn delete_flow(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM flows WHERE name = ?1", params![name])?;
        Ok(n > 0)
    }

    fn insert_run(&self, flow_name: &str, started_at: DateTime<Utc>) -> Result<RunId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (flow_name, started_at) VALUES (?1, ?2)",
            params![flow_name, fmt_ts(started_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(
        &self,
        run_id: RunId,
        ended_at: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET ended_at = ?1, outcome = ?2 WHERE run_id = ?3",
            params![fmt_ts(ended_at), outcome.as_str(), run_id],
        )?;
        Ok(())
    }

    fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        let run = conn
            .query_row(
                "SELECT run_id, flow_name, started_at, ended_at, outcome FROM runs WHERE run_id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn insert_record(&self, record: &TaskRecord) -> Result<AttemptId> {
        let attributes = serde_json::to_string(&record.attributes)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (run_id, task_name, flow_id, flow_name, state, began_at,
                                  ended_at, outcome, attributes, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.run_id,
                record.task_name,
                record.flow_id,
                record.flow_name,
                record.state.as_str(),
                record.began_at.map(fmt_ts),
                record.ended_at.map(fmt_ts),
                record.outcome.map(|k| k.as_str()),
                attributes,
                record.error_message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_record(&self, record: &TaskRecord) -> Result<bool> {
        let attributes = serde_json::to_string(&record.attributes)?;
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE records
             SET state = ?1, began_at = ?2, ended_at = ?3, outcome = ?4,
                 attributes = ?5, error_message = ?6
             WHERE attempt_id = ?7
               AND state NOT IN ('succeeded', 'failed', 'cancelled')",
            params![
                record.state.as_str(),
                record.began_at.map(fmt_ts),
                record.ended_at.map(fmt_ts),
                record.outcome.map(|k| k.as_str()),
                attributes,
                record.error_message,
                record.attempt_id,
            ],
        )?;
        Ok(n > 0)
    }

    fn get_record(&self, attempt_id: AttemptId) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE attempt_id = ?1"),
                params![attempt_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn last_success(&self, task_name: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records
                     WHERE task_name = ?1 AND state = 'succeeded'
                     ORDER BY ended_at DESC, attempt_id DESC
                     LIMIT 1"
                ),
                params![task_name],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn records_for_run(&self, run_id: RunId) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE run_id = ?1 ORDER BY attempt_id"
        ))?;
        let records = stmt
            .query_map(params![run_id], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn records_for_task(&self, task_name: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE task_name = ?1 ORDER BY attempt_id"
        ))?;
        let records = stmt
            .query_map(params![task_name], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
