// src/scheduler/step.rs

use std::collections::BTreeSet;

/// Structured result of feeding one completion into a [`RunState`].
///
/// [`RunState`]: crate::scheduler::RunState
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tasks whose parents have now all succeeded.
    pub newly_ready: Vec<String>,
    /// Tasks cancelled by this completion, each with the direct parents
    /// that were failed or cancelled at that moment.
    pub newly_cancelled: Vec<(String, BTreeSet<String>)>,
    /// Whether every task is now terminal.
    pub run_just_finished: bool,
}
