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
    ClockKind,
    CooperativeScheduler,
    Lane,
    RunConfig,
    RunOutcome,
    RunReport,
    Step,
    TaskDescriptor,
    TaskId,
    TraceEvent,
    TraceKind,
};
use ::std::{
    thread,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Helpers
//==============================================================================

fn one_slot() -> RunConfig {
    RunConfig::default().with_slots(1).with_pool(None)
}

fn run(config: RunConfig, tasks: &[TaskDescriptor]) -> Result<RunReport> {
    let mut scheduler: CooperativeScheduler = CooperativeScheduler::new(config)?;
    let report: RunReport = scheduler.run(tasks)?;
    common::check_trace(tasks, &report)?;
    Ok(report)
}

fn event(task_id: u64, step_index: usize, lane: Lane, kind: TraceKind, timestamp_ms: u64) -> TraceEvent {
    TraceEvent::new(TaskId(task_id), step_index, lane, kind, timestamp_ms)
}

//==============================================================================
// Interleaving
//==============================================================================

#[test]
fn waiting_tasks_interleave_on_one_slot() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![
        TaskDescriptor::new(1, vec![Step::wait(100); 3])?,
        TaskDescriptor::new(2, vec![Step::wait(100); 3])?,
    ];
    let report: RunReport = run(one_slot(), &tasks)?;
    let slot: Lane = Lane::Slot(0);

    ensure_eq!(
        report.events,
        vec![
            event(1, 0, slot, TraceKind::Start, 0),
            event(1, 0, slot, TraceKind::Suspend, 0),
            event(2, 0, slot, TraceKind::Start, 0),
            event(2, 0, slot, TraceKind::Suspend, 0),
            event(1, 1, slot, TraceKind::Resume, 100),
            event(1, 1, slot, TraceKind::Suspend, 100),
            event(2, 1, slot, TraceKind::Resume, 100),
            event(2, 1, slot, TraceKind::Suspend, 100),
            event(1, 2, slot, TraceKind::Resume, 200),
            event(1, 2, slot, TraceKind::Suspend, 200),
            event(2, 2, slot, TraceKind::Resume, 200),
            event(2, 2, slot, TraceKind::Suspend, 200),
            event(1, 2, slot, TraceKind::Finish, 300),
            event(2, 2, slot, TraceKind::Finish, 300),
        ]
    );
    ensure_eq!(report.outcome, RunOutcome::Completed);
    ensure_eq!(report.elapsed_ms, 300);
    Ok(())
}

#[test]
fn simultaneous_wakeups_resume_in_task_id_order() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![
        TaskDescriptor::new(2, vec![Step::wait(100); 2])?,
        TaskDescriptor::new(1, vec![Step::wait(100); 2])?,
    ];
    let report: RunReport = run(one_slot(), &tasks)?;
    let slot: Lane = Lane::Slot(0);

    // Submission order at the start, task id order once both wake up together.
    ensure_eq!(
        report.events,
        vec![
            event(2, 0, slot, TraceKind::Start, 0),
            event(2, 0, slot, TraceKind::Suspend, 0),
            event(1, 0, slot, TraceKind::Start, 0),
            event(1, 0, slot, TraceKind::Suspend, 0),
            event(1, 1, slot, TraceKind::Resume, 100),
            event(1, 1, slot, TraceKind::Suspend, 100),
            event(2, 1, slot, TraceKind::Resume, 100),
            event(2, 1, slot, TraceKind::Suspend, 100),
            event(1, 1, slot, TraceKind::Finish, 200),
            event(2, 1, slot, TraceKind::Finish, 200),
        ]
    );
    Ok(())
}

#[test]
fn compute_holds_the_slot_until_done() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![TaskDescriptor::new(1, vec![Step::compute(1000), Step::wait(50)])?];
    let report: RunReport = run(one_slot(), &tasks)?;
    let slot: Lane = Lane::Slot(0);

    ensure_eq!(
        report.events,
        vec![
            event(1, 0, slot, TraceKind::Start, 0),
            event(1, 0, slot, TraceKind::Complete, 1000),
            event(1, 1, slot, TraceKind::Resume, 1000),
            event(1, 1, slot, TraceKind::Suspend, 1000),
            event(1, 1, slot, TraceKind::Finish, 1050),
        ]
    );
    Ok(())
}

#[test]
fn thousands_of_waiters_share_one_slot() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::many_waiters(2_000, 10)?;
    let report: RunReport = run(one_slot(), &tasks)?;
    ensure_eq!(report.elapsed_ms, 10);
    ensure_eq!(report.summary().finished, 2_000);
    ensure_eq!(report.summary().max_lateness_ms, 0);
    Ok(())
}

#[test]
fn more_slots_run_compute_side_by_side() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = (1..=4)
        .map(|id| TaskDescriptor::new(id, vec![Step::compute(100)]))
        .collect::<Result<_, _>>()?;
    ensure_eq!(run(one_slot(), &tasks)?.elapsed_ms, 400);
    ensure_eq!(run(one_slot().with_slots(2), &tasks)?.elapsed_ms, 200);
    ensure_eq!(run(one_slot().with_slots(4), &tasks)?.elapsed_ms, 100);
    Ok(())
}

//==============================================================================
// Offloading
//==============================================================================

#[test]
fn offloaded_batch_takes_three_rounds_on_two_units() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = (1..=6)
        .map(|id| TaskDescriptor::new(id, vec![Step::parallel(100)]))
        .collect::<Result<_, _>>()?;
    let report: RunReport = run(one_slot().with_pool(Some(2)), &tasks)?;

    ensure_eq!(report.summary().makespan_ms, 300);
    ensure_eq!(report.summary().finished, 6);
    // Jobs go to units round robin in submission order.
    for task in &tasks {
        let started_on: Vec<Lane> = report
            .events_of(task.id())
            .iter()
            .filter(|e| matches!(e.lane, Lane::Worker(_)) && e.kind == TraceKind::Start)
            .map(|e| e.lane)
            .collect();
        ensure_eq!(started_on, vec![Lane::Worker(((task.id().0 - 1) % 2) as usize)]);
    }
    Ok(())
}

#[test]
fn offloading_keeps_waiters_on_time() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::cpu_blocking_mix()?;
    let blocked: RunReport = run(one_slot(), &tasks)?;
    let offloaded: RunReport = run(one_slot().with_pool(Some(3)), &tasks)?;

    ensure_eq!(blocked.summary().max_lateness_ms > 1000, true);
    ensure_eq!(offloaded.summary().max_lateness_ms <= 10, true);
    ensure_eq!(offloaded.elapsed_ms < blocked.elapsed_ms, true);
    Ok(())
}

#[test]
fn offloaded_compute_then_waits() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::offloaded_compute()?;
    let report: RunReport = run(one_slot().with_pool(Some(1)), &tasks)?;
    ensure_eq!(report.elapsed_ms, 2000 + 5 * 1000);
    ensure_eq!(report.summary().finished, 1);
    Ok(())
}

//==============================================================================
// Scenarios and Determinism
//==============================================================================

#[test]
fn short_compute_barely_delays_waiters() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::io_blocking_mix()?;
    let report: RunReport = run(one_slot(), &tasks)?;
    ensure_eq!(report.summary().finished, 6);
    ensure_eq!(report.summary().max_lateness_ms <= 10, true);
    ensure_eq!(report.elapsed_ms >= 10_000, true);
    Ok(())
}

#[test]
fn trace_checks_hold_for_every_scenario() -> Result<()> {
    let mut batches: Vec<Vec<TaskDescriptor>> = vec![
        scenarios::non_blocking_launch()?,
        scenarios::io_blocking_mix()?,
        scenarios::cpu_blocking_mix()?,
        scenarios::offloaded_compute()?,
    ];
    for seed in 0..8 {
        batches.push(scenarios::random_mix(seed, 20)?);
    }
    for tasks in &batches {
        for slots in 1..=3 {
            for pool in [None, Some(1), Some(3)] {
                let report: RunReport = run(one_slot().with_slots(slots).with_pool(pool), tasks)?;
                ensure_eq!(report.outcome, RunOutcome::Completed);
            }
        }
    }
    Ok(())
}

#[test]
fn same_input_same_trace() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::random_mix(42, 32)?;
    let config: RunConfig = one_slot().with_pool(Some(2));
    let first: RunReport = run(config.clone(), &tasks)?;
    let second: RunReport = run(config, &tasks)?;
    ensure_eq!(first.events, second.events);
    ensure_eq!(first.lateness_ms, second.lateness_ms);
    Ok(())
}

//==============================================================================
// Cancellation
//==============================================================================

#[test]
fn cancellation_during_wait_skips_the_resume() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![TaskDescriptor::new(1, vec![Step::wait(100), Step::wait(100)])?];
    let mut scheduler: CooperativeScheduler = CooperativeScheduler::new(one_slot())?;
    let report: RunReport = scheduler.run_with(&tasks, &CancellationToken::after(50))?;
    common::check_trace(&tasks, &report)?;

    ensure_eq!(report.outcome, RunOutcome::Cancelled);
    ensure_eq!(
        report.events,
        vec![
            event(1, 0, Lane::Slot(0), TraceKind::Start, 0),
            event(1, 0, Lane::Slot(0), TraceKind::Suspend, 0),
            event(1, 0, Lane::Detached, TraceKind::Cancelled, 50),
        ]
    );
    Ok(())
}

#[test]
fn timeout_ends_every_task() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = scenarios::cpu_blocking_mix()?;
    let report: RunReport = run(one_slot().with_timeout(Some(1000)), &tasks)?;
    ensure_eq!(report.outcome, RunOutcome::TimedOut);
    ensure_eq!(report.summary().cancelled > 0, true);
    ensure_eq!(report.summary().finished + report.summary().cancelled, tasks.len());
    Ok(())
}

#[test]
fn wall_clock_run_stops_when_cancelled_from_another_thread() -> Result<()> {
    let tasks: Vec<TaskDescriptor> = vec![
        TaskDescriptor::new(1, vec![Step::wait(5000)])?,
        TaskDescriptor::new(2, vec![Step::wait(20), Step::wait(5000)])?,
    ];
    let mut scheduler: CooperativeScheduler = CooperativeScheduler::new(one_slot().with_clock(ClockKind::Wall))?;
    let token: CancellationToken = CancellationToken::new();
    let canceller: thread::JoinHandle<()> = {
        let token: CancellationToken = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        })
    };

    let start: Instant = Instant::now();
    let report: RunReport = scheduler.run_with(&tasks, &token)?;
    let elapsed: Duration = start.elapsed();
    if canceller.join().is_err() {
        anyhow::bail!("canceller thread panicked");
    }
    common::check_trace(&tasks, &report)?;

    ensure_eq!(report.outcome, RunOutcome::Cancelled);
    ensure_eq!(elapsed < Duration::from_millis(2000), true);
    ensure_eq!(report.summary().cancelled, 2);
    // Task 2 got through its first wait before the cancellation.
    ensure_eq!(
        report
            .events_of(TaskId(2))
            .iter()
            .any(|e| e.kind == TraceKind::Resume && e.step_index == 1),
        true
    );
    Ok(())
}
