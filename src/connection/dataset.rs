// src/connection/dataset.rs

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ParadeError, Result};
use crate::types::ColumnType;

/// One row of a dataset: named, dynamically typed fields.
pub type Row = BTreeMap<String, Value>;

/// Column type hints carried alongside a store operation.
pub type TypeHints = BTreeMap<String, ColumnType>;

/// Untyped columnar table exchanged with connections.
///
/// `columns` keeps the column order; rows may omit a column, which reads
/// as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a dataset from rows, deriving the column list from the keys
    /// in order of first appearance.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn push_row(&mut self, row: Row) {
        for key in row.keys() {
            if !self.columns.contains(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column, `null` where a row lacks it.
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Keep only the given columns (in the given order).
    pub fn project(&self, columns: &[String]) -> Result<Dataset> {
        for col in columns {
            if !self.columns.contains(col) {
                return Err(ParadeError::InvalidQuery(format!("unknown column '{col}'")));
            }
        }

        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect()
            })
            .collect();

        Ok(Dataset {
            columns: columns.to_vec(),
            rows,
        })
    }

    /// Check every non-null cell against its column hint.
    ///
    /// Integers are accepted for float columns and RFC 3339 strings for
    /// timestamp columns. Columns without a hint are not checked.
    pub fn check_types(&self, hints: &TypeHints) -> Result<()> {
        for (column, ty) in hints {
            for (idx, row) in self.rows.iter().enumerate() {
                let Some(value) = row.get(column) else {
                    continue;
                };
                if value.is_null() || matches_type(value, *ty) {
                    continue;
                }
                return Err(ParadeError::TypeMismatch {
                    column: column.clone(),
                    detail: format!("row {idx}: expected {ty}, got {value}"),
                });
            }
        }
        Ok(())
    }
}

fn matches_type(value: &Value, ty: ColumnType) -> bool {
    match ty {
        ColumnType::Boolean => value.is_boolean(),
        ColumnType::Integer => value.is_i64() || value.is_u64(),
        ColumnType::Float => value.is_number(),
        ColumnType::Text => value.is_string(),
        ColumnType::Timestamp => value
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
    }
}
