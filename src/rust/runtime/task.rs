// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::std::{
    collections::HashSet,
    fmt,
};

//==============================================================================
// Structures
//==============================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TaskId(pub u64);

/// One step of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    /// Blocking, I/O-like delay. Uses no CPU, so the task can always be suspended here.
    Wait { duration_ms: u64 },
    /// CPU-bound work that cannot be preempted once started.
    Compute { work_units: u64, parallel_capable: bool },
}

/// An immutable, validated sequence of steps.
#[derive(Clone, Debug)]
pub struct TaskDescriptor {
    id: TaskId,
    steps: Vec<Step>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Step {
    pub fn wait(duration_ms: u64) -> Self {
        Step::Wait { duration_ms }
    }

    /// A compute step that must run on the slot that picked it up.
    pub fn compute(work_units: u64) -> Self {
        Step::Compute {
            work_units,
            parallel_capable: false,
        }
    }

    /// A compute step that may be handed over to a worker pool.
    pub fn parallel(work_units: u64) -> Self {
        Step::Compute {
            work_units,
            parallel_capable: true,
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Step::Wait { .. })
    }

    /// Cost of this step in milliseconds, given the cost of one unit of compute work.
    pub fn cost_ms(&self, ms_per_work_unit: u64) -> u64 {
        match self {
            Step::Wait { duration_ms } => *duration_ms,
            Step::Compute { work_units, .. } => work_units.saturating_mul(ms_per_work_unit),
        }
    }
}

impl TaskDescriptor {
    /// Builds a task, rejecting empty step lists and compute steps without work.
    pub fn new(id: u64, steps: Vec<Step>) -> Result<Self, Fail> {
        if steps.is_empty() {
            let cause: String = format!("task has no steps (task_id={:?})", id);
            error!("new(): {}", cause);
            return Err(Fail::invalid(&cause));
        }
        for (index, step) in steps.iter().enumerate() {
            if let Step::Compute { work_units: 0, .. } = step {
                let cause: String = format!("compute step without work (task_id={:?}, step={:?})", id, index);
                error!("new(): {}", cause);
                return Err(Fail::invalid(&cause));
            }
        }
        Ok(Self { id: TaskId(id), steps })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Checks that a batch of tasks can be submitted together.
pub fn validate_batch(tasks: &[TaskDescriptor]) -> Result<(), Fail> {
    let mut seen: HashSet<TaskId> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.id()) {
            let cause: String = format!("duplicate task id (task_id={:?})", task.id());
            error!("validate_batch(): {}", cause);
            return Err(Fail::invalid(&cause));
        }
    }
    Ok(())
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
