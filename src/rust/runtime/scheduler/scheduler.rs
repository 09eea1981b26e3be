// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our cooperative, single-threaded task scheduler.
//!
//! Tasks share a small number of logical slots. A task that reaches a wait step gives its slot away and is put back
//! in the ready queue once its timer expires. A task that reaches a compute step keeps its slot until the step is
//! done, and everyone else waits. Parallel-capable compute steps are handed to the pool units instead, so the slot is
//! free again while they run.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    cancel::CancellationToken,
    fail::Fail,
    pool::UnitLedger,
    scheduler::{
        run::{
            RunConfig,
            RunOutcome,
            RunReport,
        },
        slot::SlotTable,
    },
    task::{
        self,
        Step,
        TaskDescriptor,
        TaskId,
    },
    timer::{
        Clock,
        TimerQueue,
    },
    trace::{
        Lane,
        TraceEvent,
        TraceKind,
        TraceRecorder,
    },
};
use ::std::{
    collections::VecDeque,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Where a task is in its life.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    /// In the ready queue. Carries the time the task asked to wake up at, if it comes back from a wait.
    Ready { woke_for_ms: Option<u64> },
    /// Running a compute step on a slot.
    Running { slot: usize },
    /// Parked on a wait step until `due_ms`.
    Waiting { due_ms: u64 },
    /// A compute step was handed to a pool unit.
    Offloaded { unit: usize, started: bool },
    Done,
}

/// Things that happen at a point on the run clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Wakeup {
    ComputeDone { slot: usize },
    WaitExpired,
    OffloadStart { unit: usize },
    OffloadDone { unit: usize },
}

/// Timer key. Timers that expire together fire in ascending task id order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
struct Due {
    task_id: TaskId,
    task: usize,
    wakeup: Wakeup,
}

struct TaskState<'a> {
    descriptor: &'a TaskDescriptor,
    /// Index of the step that will begin next.
    next_step: usize,
    phase: Phase,
}

/// Per-run bookkeeping.
struct Run<'a> {
    tasks: Vec<TaskState<'a>>,
    ready: VecDeque<usize>,
    timers: TimerQueue<Due>,
    clock: Clock,
    /// Tasks without a terminal event.
    remaining: usize,
    outcome: RunOutcome,
    lateness_ms: Vec<u64>,
}

/// Cooperative Scheduler
pub struct CooperativeScheduler {
    config: RunConfig,
    slots: SlotTable,
    /// Pool units that take parallel-capable compute steps, if any.
    pool: Option<UnitLedger>,
    recorder: Arc<TraceRecorder>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CooperativeScheduler {
    pub fn new(config: RunConfig) -> Result<Self, Fail> {
        config.validate()?;
        Ok(Self {
            slots: SlotTable::new(config.slot_count),
            pool: config.pool_size.map(UnitLedger::new),
            recorder: Arc::new(TraceRecorder::new()),
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Recorder that receives the events of every run.
    pub fn recorder(&self) -> Arc<TraceRecorder> {
        self.recorder.clone()
    }

    /// Runs `tasks` to completion.
    pub fn run(&mut self, tasks: &[TaskDescriptor]) -> Result<RunReport, Fail> {
        self.run_with(tasks, &CancellationToken::new())
    }

    /// Runs `tasks` until they all end or `token` fires. Nothing runs if the batch is rejected.
    pub fn run_with(&mut self, tasks: &[TaskDescriptor], token: &CancellationToken) -> Result<RunReport, Fail> {
        task::validate_batch(tasks)?;
        assert!(self.slots.is_idle(), "previous run left a slot busy");
        if let Some(pool) = self.pool.as_mut() {
            pool.reset();
        }
        info!(
            "run_with(): starting (tasks={:?}, slots={:?}, pool={:?}, clock={:?})",
            tasks.len(),
            self.config.slot_count,
            self.config.pool_size,
            self.config.clock
        );

        let mut run: Run = Run {
            tasks: tasks
                .iter()
                .map(|descriptor| TaskState {
                    descriptor,
                    next_step: 0,
                    phase: Phase::Ready { woke_for_ms: None },
                })
                .collect(),
            ready: (0..tasks.len()).collect(),
            timers: TimerQueue::new(),
            clock: Clock::new(self.config.clock),
            remaining: tasks.len(),
            outcome: RunOutcome::Completed,
            lateness_ms: Vec::new(),
        };

        let drain_token: CancellationToken = CancellationToken::new();
        loop {
            if run.outcome == RunOutcome::Completed {
                if let Some(outcome) = self.observe_cancellation(&run, token) {
                    self.cancel_parked(&mut run, outcome);
                }
            }
            if run.outcome == RunOutcome::Completed {
                self.dispatch_ready(&mut run);
            }
            if run.remaining == 0 {
                break;
            }

            let next_ms: u64 = match run.timers.next_expiry() {
                Some(expiry) => expiry,
                None => panic!("{} tasks left but nothing can wake them", run.remaining),
            };
            if run.outcome == RunOutcome::Completed {
                if let Some(stop_ms) = self.stop_time(token) {
                    if stop_ms < next_ms {
                        // Either way the next iteration sees the cancellation.
                        let target_ms: u64 = stop_ms.max(run.clock.now_ms());
                        run.clock.advance_to(target_ms, token);
                        continue;
                    }
                }
            }
            // Steps in flight after a cancellation still need the clock to reach their end.
            let watch: &CancellationToken = if run.outcome == RunOutcome::Completed {
                token
            } else {
                &drain_token
            };
            if !run.clock.advance_to(next_ms, watch) {
                continue;
            }
            for due in run.timers.pop_due(run.clock.now_ms()) {
                self.fire(&mut run, due);
            }
        }

        assert!(self.slots.is_idle(), "run ended with a busy slot");
        let elapsed_ms: u64 = run.clock.now_ms();
        info!(
            "run_with(): done (outcome={:?}, elapsed_ms={:?}, events={:?})",
            run.outcome,
            elapsed_ms,
            self.recorder.len()
        );
        Ok(RunReport {
            events: self.recorder.drain(),
            outcome: run.outcome,
            elapsed_ms,
            lateness_ms: run.lateness_ms,
        })
    }

    /// Earliest run-clock time at which the run must stop on its own.
    fn stop_time(&self, token: &CancellationToken) -> Option<u64> {
        match (self.config.timeout_ms, token.deadline_ms()) {
            (Some(timeout), Some(deadline)) => Some(timeout.min(deadline)),
            (timeout, deadline) => timeout.or(deadline),
        }
    }

    fn observe_cancellation(&self, run: &Run, token: &CancellationToken) -> Option<RunOutcome> {
        let now_ms: u64 = run.clock.now_ms();
        if token.is_cancelled_at(now_ms) {
            return Some(RunOutcome::Cancelled);
        }
        match self.config.timeout_ms {
            Some(timeout) if timeout <= now_ms => Some(RunOutcome::TimedOut),
            _ => None,
        }
    }

    /// Cancels every task that is not in the middle of a step. Steps in flight run to their end.
    fn cancel_parked(&mut self, run: &mut Run, outcome: RunOutcome) {
        warn!("cancel_parked(): stopping run (outcome={:?}, now_ms={:?})", outcome, run.clock.now_ms());
        run.outcome = outcome;
        run.ready.clear();
        for index in 0..run.tasks.len() {
            let parked: bool = match run.tasks[index].phase {
                Phase::Ready { .. } | Phase::Waiting { .. } => true,
                Phase::Offloaded { started, .. } => !started,
                Phase::Running { .. } | Phase::Done => false,
            };
            if parked {
                let step: usize = run.tasks[index].next_step.saturating_sub(1);
                self.terminate(run, index, step, Lane::Detached, TraceKind::Cancelled);
            }
        }
    }

    /// Fills free slots from the ready queue.
    fn dispatch_ready(&mut self, run: &mut Run) {
        while let Some(slot) = self.slots.first_free() {
            let Some(index) = run.ready.pop_front() else {
                break;
            };
            self.begin(run, index, slot);
        }
    }

    /// Gives `slot` to task `index` and begins its next step.
    fn begin(&mut self, run: &mut Run, index: usize, slot: usize) {
        let now_ms: u64 = run.clock.now_ms();
        let lane: Lane = Lane::Slot(slot);
        let state: &mut TaskState = &mut run.tasks[index];
        let task_id: TaskId = state.descriptor.id();
        if let Phase::Ready {
            woke_for_ms: Some(due_ms),
        } = state.phase
        {
            run.lateness_ms.push(now_ms - due_ms);
        }

        let step_index: usize = state.next_step;
        let Some(step) = state.descriptor.step(step_index).copied() else {
            // The last step was a wait or ran on the pool. The task only comes back to finish.
            let last: usize = step_index - 1;
            self.terminate(run, index, last, lane, TraceKind::Finish);
            return;
        };

        let kind: TraceKind = if step_index == 0 {
            TraceKind::Start
        } else {
            TraceKind::Resume
        };
        self.record(task_id, step_index, lane, kind, now_ms);
        state.next_step += 1;

        match step {
            Step::Wait { duration_ms } => {
                self.record(task_id, step_index, lane, TraceKind::Suspend, now_ms);
                let due_ms: u64 = now_ms.saturating_add(duration_ms);
                state.phase = Phase::Waiting { due_ms };
                run.timers.push(
                    due_ms,
                    Due {
                        task_id,
                        task: index,
                        wakeup: Wakeup::WaitExpired,
                    },
                );
            },
            Step::Compute {
                parallel_capable: true,
                ..
            } if self.pool.is_some() => {
                self.record(task_id, step_index, lane, TraceKind::Suspend, now_ms);
                let cost_ms: u64 = step.cost_ms(self.config.ms_per_work_unit);
                let (unit, start_ms, end_ms) = match self.pool.as_mut() {
                    Some(pool) => pool.dispatch(now_ms, cost_ms),
                    None => unreachable!(),
                };
                trace!(
                    "begin(): offloading {} step {} to unit {} ({}..{} ms)",
                    task_id,
                    step_index,
                    unit,
                    start_ms,
                    end_ms
                );
                state.phase = Phase::Offloaded { unit, started: false };
                run.timers.push(
                    start_ms,
                    Due {
                        task_id,
                        task: index,
                        wakeup: Wakeup::OffloadStart { unit },
                    },
                );
                run.timers.push(
                    end_ms,
                    Due {
                        task_id,
                        task: index,
                        wakeup: Wakeup::OffloadDone { unit },
                    },
                );
            },
            Step::Compute { .. } => {
                let cost_ms: u64 = step.cost_ms(self.config.ms_per_work_unit);
                self.slots.occupy(slot, task_id);
                state.phase = Phase::Running { slot };
                run.timers.push(
                    now_ms.saturating_add(cost_ms),
                    Due {
                        task_id,
                        task: index,
                        wakeup: Wakeup::ComputeDone { slot },
                    },
                );
            },
        }
    }

    /// Handles a timer.
    fn fire(&mut self, run: &mut Run, due: Due) {
        let now_ms: u64 = run.clock.now_ms();
        let cancelled: bool = run.outcome != RunOutcome::Completed;
        let index: usize = due.task;
        let phase: Phase = run.tasks[index].phase;
        if phase == Phase::Done {
            // The task was cancelled while this timer was pending.
            assert!(cancelled, "timer fired for {:?}, which already ended", due.task_id);
            return;
        }
        let state: &mut TaskState = &mut run.tasks[index];
        let task_id: TaskId = state.descriptor.id();
        let step_index: usize = state.next_step - 1;
        let is_last: bool = state.next_step == state.descriptor.len();

        match (due.wakeup, phase) {
            (Wakeup::ComputeDone { slot }, Phase::Running { slot: running }) if slot == running => {
                self.slots.release(slot, task_id);
                let lane: Lane = Lane::Slot(slot);
                if is_last {
                    self.terminate(run, index, step_index, lane, TraceKind::Finish);
                } else if cancelled {
                    self.record(task_id, step_index, lane, TraceKind::Complete, now_ms);
                    self.terminate(run, index, step_index, lane, TraceKind::Cancelled);
                } else {
                    self.record(task_id, step_index, lane, TraceKind::Complete, now_ms);
                    state.phase = Phase::Ready { woke_for_ms: None };
                    run.ready.push_back(index);
                }
            },
            (Wakeup::WaitExpired, Phase::Waiting { due_ms }) => {
                state.phase = Phase::Ready {
                    woke_for_ms: Some(due_ms),
                };
                run.ready.push_back(index);
            },
            (Wakeup::OffloadStart { unit }, Phase::Offloaded { unit: owner, started: false }) if unit == owner => {
                state.phase = Phase::Offloaded { unit, started: true };
                self.record(task_id, step_index, Lane::Worker(unit), TraceKind::Start, now_ms);
            },
            (Wakeup::OffloadDone { unit }, Phase::Offloaded { unit: owner, started: true }) if unit == owner => {
                let lane: Lane = Lane::Worker(unit);
                if is_last && cancelled {
                    // Nothing is left to skip, so the task ends on the unit that ran its last step.
                    self.terminate(run, index, step_index, lane, TraceKind::Finish);
                } else if cancelled {
                    self.record(task_id, step_index, lane, TraceKind::Complete, now_ms);
                    self.terminate(run, index, step_index, Lane::Detached, TraceKind::Cancelled);
                } else {
                    self.record(task_id, step_index, lane, TraceKind::Complete, now_ms);
                    state.phase = Phase::Ready { woke_for_ms: None };
                    run.ready.push_back(index);
                }
            },
            (wakeup, phase) => panic!("{:?} fired for {:?} while in {:?}", wakeup, task_id, phase),
        }
    }

    /// Records the terminal event of task `index`.
    fn terminate(&mut self, run: &mut Run, index: usize, step_index: usize, lane: Lane, kind: TraceKind) {
        debug_assert!(kind.is_terminal());
        let state: &mut TaskState = &mut run.tasks[index];
        assert_ne!(state.phase, Phase::Done, "{:?} ended twice", state.descriptor.id());
        state.phase = Phase::Done;
        run.remaining -= 1;
        let task_id: TaskId = state.descriptor.id();
        self.record(task_id, step_index, lane, kind, run.clock.now_ms());
    }

    fn record(&self, task_id: TaskId, step_index: usize, lane: Lane, kind: TraceKind, timestamp_ms: u64) {
        self.recorder
            .record(TraceEvent::new(task_id, step_index, lane, kind, timestamp_ms));
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
