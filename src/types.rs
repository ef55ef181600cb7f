// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a dataset is written into an existing (or missing) table.
///
/// - `Replace`: drop whatever the table held and write the new rows.
/// - `Append`: add rows to the table, creating it if needed.
/// - `Fail`: refuse to write if the table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Replace,
    Append,
    Fail,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Replace
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(WriteMode::Replace),
            "append" => Ok(WriteMode::Append),
            "fail" => Ok(WriteMode::Fail),
            other => Err(format!(
                "invalid write mode: {other} (expected \"replace\", \"append\" or \"fail\")"
            )),
        }
    }
}

/// Column type used as a hint when storing a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Text,
    Timestamp,
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "integer" | "int" => Ok(ColumnType::Integer),
            "float" | "double" => Ok(ColumnType::Float),
            "text" | "string" => Ok(ColumnType::Text),
            "timestamp" => Ok(ColumnType::Timestamp),
            other => Err(format!("invalid column type: {other}")),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}
