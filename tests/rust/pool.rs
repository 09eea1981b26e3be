// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::coopsched::{
    ensure_eq,
    runtime::pool::{
        self,
        PoolRun,
    },
    CancellationToken,
    ComputeJob,
    Lane,
    TaskId,
    TraceEvent,
    TraceKind,
    WorkModel,
    WorkerPool,
};
use ::std::collections::HashMap;

//==============================================================================
// Helpers
//==============================================================================

fn jobs(count: u64, work_units: u64) -> Vec<ComputeJob> {
    (1..=count).map(|id| ComputeJob::new(TaskId(id), 0, work_units)).collect()
}

/// Start and end of every job that ran, keyed by unit.
fn unit_intervals(events: &[TraceEvent]) -> Result<HashMap<usize, Vec<(u64, u64)>>> {
    let mut started: HashMap<TaskId, u64> = HashMap::new();
    let mut intervals: HashMap<usize, Vec<(u64, u64)>> = HashMap::new();
    for event in events {
        let Lane::Worker(unit) = event.lane else {
            anyhow::bail!("pool recorded an event off its worker lanes: {}", event);
        };
        match event.kind {
            TraceKind::Start => {
                started.insert(event.task_id, event.timestamp_ms);
            },
            TraceKind::Finish => match started.remove(&event.task_id) {
                Some(start_ms) => intervals.entry(unit).or_default().push((start_ms, event.timestamp_ms)),
                None => anyhow::bail!("{} finished without starting", event.task_id),
            },
            TraceKind::Cancelled => (),
            kind => anyhow::bail!("unexpected {:?} from the pool", kind),
        }
    }
    Ok(intervals)
}

//==============================================================================
// Tests
//==============================================================================

#[test]
fn six_jobs_on_two_units_take_three_rounds() -> Result<()> {
    let workers: WorkerPool = WorkerPool::new(2, WorkModel::Sleep, 1)?;
    let run: PoolRun = workers.submit_parallel_with(&jobs(6, 100), &CancellationToken::new())?;

    ensure_eq!(run.elapsed_ms >= 300, true);
    ensure_eq!(run.elapsed_ms < 600, true);
    ensure_eq!(run.outputs.iter().all(Option::is_some), true);
    ensure_eq!(run.events.len(), 12);

    for event in &run.events {
        ensure_eq!(event.lane, Lane::Worker(((event.task_id.0 - 1) % 2) as usize));
    }
    let intervals: HashMap<usize, Vec<(u64, u64)>> = unit_intervals(&run.events)?;
    ensure_eq!(intervals.len(), 2);
    for (unit, mut busy) in intervals {
        ensure_eq!(busy.len(), 3);
        busy.sort();
        for pair in busy.windows(2) {
            if pair[1].0 < pair[0].1 {
                anyhow::bail!("unit {} ran two jobs at once: {:?}", unit, pair);
            }
        }
    }
    Ok(())
}

#[test]
fn spinning_jobs_produce_output() -> Result<()> {
    let workers: WorkerPool = WorkerPool::new(2, WorkModel::Spin, 1)?;
    let run: PoolRun = workers.submit_parallel_with(&jobs(4, 10), &CancellationToken::new())?;
    ensure_eq!(run.outputs.len(), 4);
    ensure_eq!(run.outputs.iter().all(Option::is_some), true);
    ensure_eq!(run.elapsed_ms >= 20, true);
    Ok(())
}

#[test]
fn cancellation_skips_jobs_that_have_not_started() -> Result<()> {
    let workers: WorkerPool = WorkerPool::new(1, WorkModel::Sleep, 1)?;
    let run: PoolRun = workers.submit_parallel_with(&jobs(3, 100), &CancellationToken::after(50))?;

    ensure_eq!(run.outputs[0].is_some(), true);
    ensure_eq!(run.outputs[1], None);
    ensure_eq!(run.outputs[2], None);
    let kinds: Vec<(TaskId, TraceKind)> = run.events.iter().map(|e| (e.task_id, e.kind)).collect();
    ensure_eq!(
        kinds,
        vec![
            (TaskId(1), TraceKind::Start),
            (TaskId(1), TraceKind::Finish),
            (TaskId(2), TraceKind::Cancelled),
            (TaskId(3), TraceKind::Cancelled),
        ]
    );
    Ok(())
}

#[test]
fn batches_do_not_share_events() -> Result<()> {
    let workers: WorkerPool = WorkerPool::new(3, WorkModel::Sleep, 1)?;
    let first: Vec<TraceEvent> = workers.submit_parallel(&jobs(3, 5))?;
    let second: Vec<TraceEvent> = workers.submit_parallel(&jobs(2, 5))?;
    ensure_eq!(first.len(), 6);
    ensure_eq!(second.len(), 4);
    Ok(())
}

#[test]
fn rejects_bad_pools_and_jobs() -> Result<()> {
    ensure_eq!(WorkerPool::new(0, WorkModel::Spin, 1).is_err(), true);
    ensure_eq!(WorkerPool::new(1, WorkModel::Spin, 0).is_err(), true);

    let workers: WorkerPool = WorkerPool::with_available_parallelism(WorkModel::Sleep, 1)?;
    ensure_eq!(workers.pool_size(), pool::available_parallelism());
    match workers.submit_parallel(&jobs(1, 0)) {
        Ok(_) => anyhow::bail!("a job without work should have been rejected"),
        Err(e) => ensure_eq!(e.is_invalid(), true),
    }
    Ok(())
}
