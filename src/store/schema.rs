// src/store/schema.rs

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS flows (
    name TEXT PRIMARY KEY,
    tasks TEXT NOT NULL,
    deps TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    flow_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    outcome TEXT
);

CREATE TABLE IF NOT EXISTS records (
    attempt_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    task_name TEXT NOT NULL,
    flow_id TEXT NOT NULL,
    flow_name TEXT NOT NULL,
    state TEXT NOT NULL,
    began_at TEXT,
    ended_at TEXT,
    outcome TEXT,
    attributes TEXT NOT NULL DEFAULT '{}',
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS records_last_success
    ON records (task_name, state, ended_at DESC);

CREATE INDEX IF NOT EXISTS records_by_run
    ON records (run_id);
"#;
