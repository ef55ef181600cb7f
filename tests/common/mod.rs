#![allow(dead_code)]

pub use parade_test_utils::{init_tracing, ts, with_timeout};

use parade::engine::{Engine, RunReport};
use parade::flow::Flow;
use parade::task::TaskState;

/// Every task of the flow has exactly one record in the run, and it is
/// terminal.
pub fn assert_one_terminal_record_each(engine: &Engine, report: &RunReport) {
    let records = engine
        .recorder()
        .records_for_run(report.run_id)
        .expect("records readable");
    assert_eq!(records.len(), report.order.len(), "one record per task");
    for task in &report.order {
        let mine: Vec<_> = records.iter().filter(|r| &r.task_name == task).collect();
        assert_eq!(mine.len(), 1, "task {task} has exactly one record");
        assert!(mine[0].is_terminal(), "record of {task} is terminal");
        assert!(mine[0].ended_at.is_some(), "record of {task} has ended_at");
    }
}

/// Every task that began, began after all of its parents ended
/// successfully.
pub fn assert_began_after_parents(flow: &Flow, report: &RunReport) {
    for task in &report.order {
        let record = report.record(task).expect("record present");
        let Some(began) = record.began_at else {
            continue;
        };
        for parent in flow.parents_of(task) {
            let p = report.record(parent).expect("parent record present");
            assert_eq!(p.state, TaskState::Succeeded, "{parent} succeeded before {task} began");
            let ended = p.ended_at.expect("parent ended");
            assert!(began > ended, "{task} began ({began}) after {parent} ended ({ended})");
        }
    }
}
