// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace checks shared by the integration tests.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::coopsched::{
    Lane,
    RunReport,
    TaskDescriptor,
    TaskId,
    TraceEvent,
    TraceKind,
};
use ::std::collections::HashMap;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Every submitted task ends exactly once, and nothing happens to it afterwards.
#[allow(dead_code)]
pub fn check_one_terminal_per_task(tasks: &[TaskDescriptor], report: &RunReport) -> Result<()> {
    for task in tasks {
        let events: Vec<TraceEvent> = report.events_of(task.id());
        let terminals: usize = events.iter().filter(|e| e.kind.is_terminal()).count();
        if terminals != 1 {
            anyhow::bail!("{} has {} terminal events: {:?}", task.id(), terminals, events);
        }
        match events.last() {
            Some(last) if last.kind.is_terminal() => (),
            _ => anyhow::bail!("{} has events after its terminal event: {:?}", task.id(), events),
        }
    }
    Ok(())
}

/// Steps of a task begin in strictly increasing order. Pool lanes are left out, since they run a step that already
/// began on a slot.
#[allow(dead_code)]
pub fn check_step_order(report: &RunReport) -> Result<()> {
    let mut last_begun: HashMap<TaskId, usize> = HashMap::new();
    for event in &report.events {
        if !event.kind.is_begin() || matches!(event.lane, Lane::Worker(_)) {
            continue;
        }
        if let Some(previous) = last_begun.insert(event.task_id, event.step_index) {
            if event.step_index <= previous {
                anyhow::bail!("{} began step {} after step {}", event.task_id, event.step_index, previous);
            }
        }
    }
    Ok(())
}

/// Intervals during which a compute step held a slot, keyed by slot.
#[allow(dead_code)]
pub fn slot_occupancy(report: &RunReport) -> HashMap<usize, Vec<(u64, u64, TaskId)>> {
    let mut pending: HashMap<TaskId, (usize, usize, u64)> = HashMap::new();
    let mut intervals: HashMap<usize, Vec<(u64, u64, TaskId)>> = HashMap::new();
    for event in &report.events {
        let Lane::Slot(slot) = event.lane else {
            continue;
        };
        match event.kind {
            TraceKind::Start | TraceKind::Resume => {
                pending.insert(event.task_id, (slot, event.step_index, event.timestamp_ms));
            },
            // Wait steps and offloaded steps give the slot back right away.
            TraceKind::Suspend => {
                pending.remove(&event.task_id);
            },
            TraceKind::Complete | TraceKind::Finish | TraceKind::Cancelled => {
                if let Some((begun_on, step, start_ms)) = pending.remove(&event.task_id) {
                    if begun_on == slot && step == event.step_index {
                        intervals
                            .entry(slot)
                            .or_default()
                            .push((start_ms, event.timestamp_ms, event.task_id));
                    }
                }
            },
        }
    }
    intervals
}

/// No slot ever runs two compute steps at the same time.
#[allow(dead_code)]
pub fn check_no_slot_overlap(report: &RunReport) -> Result<()> {
    for (slot, mut intervals) in slot_occupancy(report) {
        intervals.sort();
        for pair in intervals.windows(2) {
            let (_, end, first) = pair[0];
            let (start, _, second) = pair[1];
            if start < end {
                anyhow::bail!("slot {} ran {} and {} at the same time", slot, first, second);
            }
        }
    }
    Ok(())
}

/// Runs every trace check.
#[allow(dead_code)]
pub fn check_trace(tasks: &[TaskDescriptor], report: &RunReport) -> Result<()> {
    check_one_terminal_per_task(tasks, report)?;
    check_step_order(report)?;
    check_no_slot_overlap(report)
}
