// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::task::TaskId;
use ::std::{
    fmt,
    mem,
    sync::{
        Mutex,
        MutexGuard,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Where a task was (or was not) executing when an event was recorded.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub enum Lane {
    /// A logical slot of the cooperative scheduler.
    Slot(usize),
    /// A unit of the worker pool.
    Worker(usize),
    /// A dedicated OS thread.
    Thread(usize),
    /// Parked on no lane at all.
    Detached,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceKind {
    Start,
    Suspend,
    Resume,
    /// A compute step that is not the last one finished and released its lane.
    Complete,
    /// The last step of the task is done.
    Finish,
    Cancelled,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TraceEvent {
    pub task_id: TaskId,
    pub step_index: usize,
    pub lane: Lane,
    pub kind: TraceKind,
    pub timestamp_ms: u64,
}

/// Append-only event log shared by every runner.
#[derive(Default)]
pub struct TraceRecorder {
    events: Mutex<Vec<TraceEvent>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TraceKind {
    /// Whether this event ends the life of its task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceKind::Finish | TraceKind::Cancelled)
    }

    /// Whether this event puts a task on its lane.
    pub fn is_begin(&self) -> bool {
        matches!(self, TraceKind::Start | TraceKind::Resume)
    }
}

impl TraceEvent {
    pub fn new(task_id: TaskId, step_index: usize, lane: Lane, kind: TraceKind, timestamp_ms: u64) -> Self {
        Self {
            task_id,
            step_index,
            lane,
            kind,
            timestamp_ms,
        }
    }
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: TraceEvent) {
        trace!("record(): {}", event);
        self.lock().push(event);
    }

    /// Returns every recorded event in recording order and empties the log.
    pub fn drain(&self) -> Vec<TraceEvent> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Events are pushed whole, so a poisoned lock still holds a consistent log.
    fn lock(&self) -> MutexGuard<'_, Vec<TraceEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Slot(id) => write!(f, "slot-{}", id),
            Lane::Worker(id) => write!(f, "worker-{}", id),
            Lane::Thread(id) => write!(f, "thread-{}", id),
            Lane::Detached => write!(f, "detached"),
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>8} ms] {} step={} {:?} on {}",
            self.timestamp_ms, self.task_id, self.step_index, self.kind, self.lane
        )
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
