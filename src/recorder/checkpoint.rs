// src/recorder/checkpoint.rs

//! Checkpoint alignment and the idempotent-skip rule.
//!
//! A checkpoint is `now` rounded down to a multiple of the task's
//! granularity, counted from the Unix epoch. A task whose current
//! checkpoint is not newer than the checkpoint of its last success has
//! nothing new to do and is skipped unless the run is forced.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::recorder::record::{Attributes, CURRENT_CHECKPOINT, LAST_CHECKPOINT, TaskRecord};

/// Attribute value meaning "no successful run yet".
pub const NEVER: &str = "never";

/// Round `now` down to the granularity grid.
pub fn align(now: DateTime<Utc>, granularity: Duration) -> DateTime<Utc> {
    let step = i64::try_from(granularity.as_micros()).unwrap_or(i64::MAX).max(1);
    let aligned = now.timestamp_micros().div_euclid(step) * step;
    DateTime::from_timestamp_micros(aligned).unwrap_or(now)
}

pub fn format_checkpoint(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a checkpoint attribute; "never" and non-strings read as `None`.
pub fn parse_checkpoint(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    if s == NEVER {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Checkpoint pair for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Checkpoint of the most recent success, `None` if never succeeded.
    pub last: Option<DateTime<Utc>>,
    pub current: DateTime<Utc>,
}

impl Checkpoint {
    pub fn compute(
        last_success: Option<&TaskRecord>,
        now: DateTime<Utc>,
        granularity: Duration,
    ) -> Self {
        Self {
            last: last_success.and_then(TaskRecord::current_checkpoint),
            current: align(now, granularity),
        }
    }

    /// True when the last success already covers the current checkpoint.
    pub fn is_fresh(&self) -> bool {
        matches!(self.last, Some(last) if self.current <= last)
    }

    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(
            LAST_CHECKPOINT.to_string(),
            Value::String(
                self.last
                    .map(format_checkpoint)
                    .unwrap_or_else(|| NEVER.to_string()),
            ),
        );
        attrs.insert(
            CURRENT_CHECKPOINT.to_string(),
            Value::String(format_checkpoint(self.current)),
        );
        attrs
    }
}

