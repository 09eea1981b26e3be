// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    pool::{
        self,
        WorkModel,
    },
    task::TaskId,
    timer::ClockKind,
    trace::{
        TraceEvent,
        TraceKind,
    },
};
use ::std::collections::HashSet;

//======================================================================================================================
// Constants
//======================================================================================================================

/// One logical slot, like a single UI-affine thread.
pub const DEFAULT_SLOT_COUNT: usize = 1;
pub const DEFAULT_MS_PER_WORK_UNIT: u64 = 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Configuration of a single run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of logical slots of the cooperative scheduler.
    pub slot_count: usize,
    /// Number of pool units that take parallel-capable compute steps. None runs those steps on the slots.
    pub pool_size: Option<usize>,
    /// Wall-clock budget of the run, measured on the run clock.
    pub timeout_ms: Option<u64>,
    /// Milliseconds that one unit of compute work costs.
    pub ms_per_work_unit: u64,
    pub clock: ClockKind,
    /// How real pool threads spend compute cost.
    pub work_model: WorkModel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

/// Everything a run produced.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub events: Vec<TraceEvent>,
    pub outcome: RunOutcome,
    /// Run clock reading when the last task ended.
    pub elapsed_ms: u64,
    /// For every wait that ended, how long after its requested wake-up time the task actually got going again.
    pub lateness_ms: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub makespan_ms: u64,
    pub finished: usize,
    pub cancelled: usize,
    pub mean_lateness_ms: f64,
    pub max_lateness_ms: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RunConfig {
    /// Rejects configurations that cannot run anything.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.slot_count == 0 {
            let cause: &str = "scheduler needs at least one slot";
            error!("validate(): {}", cause);
            return Err(Fail::invalid(cause));
        }
        if self.pool_size == Some(0) {
            let cause: &str = "worker pool needs at least one unit";
            error!("validate(): {}", cause);
            return Err(Fail::invalid(cause));
        }
        if self.ms_per_work_unit == 0 {
            let cause: &str = "work units must have a non-zero cost";
            error!("validate(): {}", cause);
            return Err(Fail::invalid(cause));
        }
        Ok(())
    }

    pub fn with_slots(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn with_pool(mut self, pool_size: Option<usize>) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_clock(mut self, clock: ClockKind) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ms_per_work_unit(mut self, ms_per_work_unit: u64) -> Self {
        self.ms_per_work_unit = ms_per_work_unit;
        self
    }

    pub fn with_work_model(mut self, work_model: WorkModel) -> Self {
        self.work_model = work_model;
        self
    }
}

impl RunOutcome {
    /// The error a caller would see if it treated this outcome as a failure.
    pub fn into_fail(self) -> Option<Fail> {
        match self {
            RunOutcome::Completed => None,
            RunOutcome::Cancelled => Some(Fail::cancelled("run cancelled")),
            RunOutcome::TimedOut => Some(Fail::timed_out("run exceeded its time budget")),
        }
    }
}

impl RunReport {
    /// Events of one task, in recording order.
    pub fn events_of(&self, task_id: TaskId) -> Vec<TraceEvent> {
        self.events.iter().filter(|e| e.task_id == task_id).copied().collect()
    }

    pub fn summary(&self) -> RunSummary {
        let mut finished: HashSet<TaskId> = HashSet::new();
        let mut cancelled: HashSet<TaskId> = HashSet::new();
        for event in &self.events {
            match event.kind {
                TraceKind::Finish => {
                    finished.insert(event.task_id);
                },
                TraceKind::Cancelled => {
                    cancelled.insert(event.task_id);
                },
                _ => (),
            }
        }
        let makespan_ms: u64 = self.events.iter().map(|e| e.timestamp_ms).max().unwrap_or(0);
        let max_lateness_ms: u64 = self.lateness_ms.iter().copied().max().unwrap_or(0);
        let mean_lateness_ms: f64 = if self.lateness_ms.is_empty() {
            0.0
        } else {
            self.lateness_ms.iter().sum::<u64>() as f64 / self.lateness_ms.len() as f64
        };
        RunSummary {
            makespan_ms,
            finished: finished.len(),
            cancelled: cancelled.len(),
            mean_lateness_ms,
            max_lateness_ms,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            pool_size: Some(pool::available_parallelism()),
            timeout_ms: None,
            ms_per_work_unit: DEFAULT_MS_PER_WORK_UNIT,
            clock: ClockKind::Virtual,
            work_model: WorkModel::Spin,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
