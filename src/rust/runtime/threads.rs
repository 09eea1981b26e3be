// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! One OS thread per task.
//!
//! This is the baseline the cooperative scheduler is compared against: every wait step blocks a whole thread, and
//! nothing else can use that thread until the wait is over.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    cancel::CancellationToken,
    fail::Fail,
    pool::WorkModel,
    scheduler::{
        RunOutcome,
        RunReport,
    },
    task::{
        self,
        Step,
        TaskDescriptor,
        TaskId,
    },
    trace::{
        Lane,
        TraceEvent,
        TraceKind,
        TraceRecorder,
    },
};
use ::std::{
    sync::Arc,
    thread::{
        self,
        ScopedJoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Task threads do very little, so keep their stacks small enough to spawn thousands of them.
const THREAD_STACK_SIZE: usize = 64 * 1024;

//======================================================================================================================
// Structures
//======================================================================================================================

pub struct ThreadPerTask {
    ms_per_work_unit: u64,
    model: WorkModel,
    /// Run-clock time after which no task begins another step.
    timeout_ms: Option<u64>,
    recorder: Arc<TraceRecorder>,
}

/// What one task thread reports back.
struct ThreadOutcome {
    /// Why the task stopped early, if it did.
    stopped: Option<RunOutcome>,
    lateness_ms: Vec<u64>,
}

/// Everything a task thread needs besides its descriptor.
#[derive(Clone)]
struct ThreadContext {
    origin: Instant,
    token: CancellationToken,
    /// Fired when the run itself has to be torn down.
    abort: CancellationToken,
    timeout_ms: Option<u64>,
    recorder: Arc<TraceRecorder>,
    ms_per_work_unit: u64,
    model: WorkModel,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ThreadPerTask {
    pub fn new(ms_per_work_unit: u64, model: WorkModel) -> Result<Self, Fail> {
        if ms_per_work_unit == 0 {
            let cause: &str = "work units must have a non-zero cost";
            error!("new(): {}", cause);
            return Err(Fail::invalid(cause));
        }
        Ok(Self {
            ms_per_work_unit,
            model,
            timeout_ms: None,
            recorder: Arc::new(TraceRecorder::new()),
        })
    }

    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn run(&self, tasks: &[TaskDescriptor]) -> Result<RunReport, Fail> {
        self.run_with(tasks, &CancellationToken::new())
    }

    /// Spawns one thread per task and waits for all of them.
    pub fn run_with(&self, tasks: &[TaskDescriptor], token: &CancellationToken) -> Result<RunReport, Fail> {
        task::validate_batch(tasks)?;
        info!("run_with(): spawning {} task threads", tasks.len());

        let context: ThreadContext = ThreadContext {
            origin: Instant::now(),
            token: token.clone(),
            abort: CancellationToken::new(),
            timeout_ms: self.timeout_ms,
            recorder: self.recorder.clone(),
            ms_per_work_unit: self.ms_per_work_unit,
            model: self.model,
        };

        let outcomes: Result<Vec<ThreadOutcome>, Fail> = thread::scope(|scope| {
            let mut handles: Vec<ScopedJoinHandle<'_, ThreadOutcome>> = Vec::with_capacity(tasks.len());
            let mut spawn_error: Option<Fail> = None;
            for (lane, descriptor) in tasks.iter().enumerate() {
                let thread_context: ThreadContext = context.clone();
                let spawned = thread::Builder::new()
                    .name(format!("task-{}", descriptor.id().0))
                    .stack_size(THREAD_STACK_SIZE)
                    .spawn_scoped(scope, move || run_task(descriptor, lane, &thread_context));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        let cause: String = format!("cannot spawn task thread (lane={:?}, error={:?})", lane, e);
                        error!("run_with(): {}", cause);
                        spawn_error = Some(Fail::new(libc::EAGAIN, &cause));
                        context.abort.cancel();
                        break;
                    },
                }
            }

            let mut outcomes: Vec<ThreadOutcome> = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.join() {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(_) => {
                        if spawn_error.is_none() {
                            spawn_error = Some(Fail::new(libc::EIO, "task thread panicked"));
                        }
                    },
                }
            }
            match spawn_error {
                Some(e) => Err(e),
                None => Ok(outcomes),
            }
        });

        let events: Vec<TraceEvent> = self.recorder.drain();
        let outcomes: Vec<ThreadOutcome> = outcomes?;
        let elapsed_ms: u64 = context.origin.elapsed().as_millis() as u64;
        // A cancellation from the caller wins over the timeout.
        let outcome: RunOutcome = outcomes
            .iter()
            .filter_map(|o| o.stopped)
            .min_by_key(|stopped| *stopped != RunOutcome::Cancelled)
            .unwrap_or(RunOutcome::Completed);
        info!("run_with(): done (outcome={:?}, elapsed_ms={:?})", outcome, elapsed_ms);

        Ok(RunReport {
            events,
            outcome,
            elapsed_ms,
            lateness_ms: outcomes.into_iter().flat_map(|o| o.lateness_ms).collect(),
        })
    }
}

impl ThreadContext {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Whether a task thread has to stop before its next step, and why.
    fn stop_reason(&self) -> Option<RunOutcome> {
        let now_ms: u64 = self.now_ms();
        if self.abort.is_cancelled() || self.token.is_cancelled_at(now_ms) {
            return Some(RunOutcome::Cancelled);
        }
        match self.timeout_ms {
            Some(timeout) if timeout <= now_ms => Some(RunOutcome::TimedOut),
            _ => None,
        }
    }

    fn record(&self, task_id: TaskId, step_index: usize, lane: Lane, kind: TraceKind) {
        self.recorder
            .record(TraceEvent::new(task_id, step_index, lane, kind, self.now_ms()));
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Body of a task thread. Cancellation is only looked at between steps.
fn run_task(descriptor: &TaskDescriptor, lane: usize, context: &ThreadContext) -> ThreadOutcome {
    let task_id: TaskId = descriptor.id();
    let lane: Lane = Lane::Thread(lane);
    let mut lateness_ms: Vec<u64> = Vec::new();

    for (step_index, step) in descriptor.steps().iter().enumerate() {
        if let Some(stopped) = context.stop_reason() {
            context.record(task_id, step_index.saturating_sub(1), lane, TraceKind::Cancelled);
            return ThreadOutcome {
                stopped: Some(stopped),
                lateness_ms,
            };
        }

        let kind: TraceKind = if step_index == 0 {
            TraceKind::Start
        } else {
            TraceKind::Resume
        };
        context.record(task_id, step_index, lane, kind);
        let is_last: bool = step_index + 1 == descriptor.len();

        match step {
            Step::Wait { duration_ms } => {
                context.record(task_id, step_index, lane, TraceKind::Suspend);
                let due_ms: u64 = context.now_ms().saturating_add(*duration_ms);
                thread::sleep(Duration::from_millis(*duration_ms));
                lateness_ms.push(context.now_ms().saturating_sub(due_ms));
                if is_last {
                    context.record(task_id, step_index, lane, TraceKind::Finish);
                }
            },
            Step::Compute { .. } => {
                context
                    .model
                    .perform(Duration::from_millis(step.cost_ms(context.ms_per_work_unit)));
                let kind: TraceKind = if is_last {
                    TraceKind::Finish
                } else {
                    TraceKind::Complete
                };
                context.record(task_id, step_index, lane, kind);
            },
        }
    }

    ThreadOutcome {
        stopped: None,
        lateness_ms,
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
