// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::coopsched::{
    ensure_eq,
    scenarios,
    CancellationToken,
    CooperativeScheduler,
    Lane,
    RunConfig,
    RunOutcome,
    RunReport,
    Step,
    TaskDescriptor,
    TaskId,
    ThreadPerTask,
    TraceKind,
    WorkModel,
};
use ::std::{
    collections::HashSet,
    thread,
    time::Duration,
};

//==============================================================================
// Helpers
//==============================================================================

fn kinds(report: &RunReport, task_id: TaskId) -> Vec<(TraceKind, usize)> {
    report.events_of(task_id).iter().map(|e| (e.kind, e.step_index)).collect()
}

//==============================================================================
// Tests
//==============================================================================

#[test]
fn every_task_gets_its_own_thread() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::many_waiters(500, 50)?;
    let runner: ThreadPerTask = ThreadPerTask::new(1, WorkModel::Sleep)?;
    let report: RunReport = runner.run(&tasks)?;
    common::check_trace(&tasks, &report)?;

    ensure_eq!(report.outcome, RunOutcome::Completed);
    ensure_eq!(report.summary().finished, 500);
    // The waits overlap instead of adding up.
    ensure_eq!(report.elapsed_ms < 5_000, true);
    let lanes: HashSet<Lane> = report.events.iter().map(|e| e.lane).collect();
    ensure_eq!(lanes.len(), 500);
    Ok(())
}

#[test]
fn same_steps_as_the_cooperative_scheduler() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![
        TaskDescriptor::new(1, vec![Step::wait(30); 3])?,
        TaskDescriptor::new(2, vec![Step::compute(20), Step::wait(10), Step::compute(5)])?,
    ];
    let threaded: RunReport = ThreadPerTask::new(1, WorkModel::Spin)?.run(&tasks)?;
    let cooperative: RunReport =
        CooperativeScheduler::new(RunConfig::default().with_slots(1).with_pool(None))?.run(&tasks)?;
    common::check_trace(&tasks, &threaded)?;

    for task in &tasks {
        ensure_eq!(kinds(&threaded, task.id()), kinds(&cooperative, task.id()));
    }
    Ok(())
}

#[test]
fn cancellation_is_seen_between_steps() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![TaskDescriptor::new(1, vec![Step::wait(200), Step::wait(200)])?];
    let runner: ThreadPerTask = ThreadPerTask::new(1, WorkModel::Sleep)?;
    let token: CancellationToken = CancellationToken::new();
    let canceller: thread::JoinHandle<()> = {
        let token: CancellationToken = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let report: RunReport = runner.run_with(&tasks, &token)?;
    if canceller.join().is_err() {
        anyhow::bail!("canceller thread panicked");
    }
    common::check_trace(&tasks, &report)?;

    ensure_eq!(report.outcome, RunOutcome::Cancelled);
    // The thread sleeps through its first wait, then notices.
    ensure_eq!(
        kinds(&report, TaskId(1)),
        vec![(TraceKind::Start, 0), (TraceKind::Suspend, 0), (TraceKind::Cancelled, 0)]
    );
    ensure_eq!(report.elapsed_ms >= 200, true);
    ensure_eq!(report.elapsed_ms < 400, true);
    Ok(())
}

#[test]
fn timeout_ends_the_run_as_timed_out() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![TaskDescriptor::new(1, vec![Step::wait(100), Step::wait(100)])?];
    let runner: ThreadPerTask = ThreadPerTask::new(1, WorkModel::Sleep)?.with_timeout(Some(50));
    let report: RunReport = runner.run(&tasks)?;
    common::check_trace(&tasks, &report)?;

    ensure_eq!(report.outcome, RunOutcome::TimedOut);
    ensure_eq!(report.outcome.into_fail().map(|e| e.is_timeout()), Some(true));
    ensure_eq!(
        kinds(&report, TaskId(1)),
        vec![(TraceKind::Start, 0), (TraceKind::Suspend, 0), (TraceKind::Cancelled, 0)]
    );
    ensure_eq!(report.elapsed_ms < 200, true);
    Ok(())
}

#[test]
fn duplicate_ids_are_rejected() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![
        TaskDescriptor::new(9, vec![Step::wait(1)])?,
        TaskDescriptor::new(9, vec![Step::wait(1)])?,
    ];
    match ThreadPerTask::new(1, WorkModel::Sleep)?.run(&tasks) {
        Ok(_) => anyhow::bail!("duplicate ids should have been rejected"),
        Err(e) => ensure_eq!(e.is_invalid(), true),
    }
    Ok(())
}
