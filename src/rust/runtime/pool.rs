// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Worker pool for compute steps.
//!
//! The pool owns one long-lived OS thread per unit. Each unit is fed through its own channel, so jobs are assigned
//! round-robin at submission time and every unit works through its share strictly one job at a time.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    cancel::CancellationToken,
    fail::Fail,
    task::TaskId,
    trace::{
        Lane,
        TraceEvent,
        TraceKind,
        TraceRecorder,
    },
};
use ::crossbeam_channel::{
    self,
    Receiver,
    Sender,
};
use ::std::{
    hint::black_box,
    num::NonZeroUsize,
    str::FromStr,
    sync::{
        Arc,
        Mutex,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Iterations of busy work between two looks at the clock.
const SPIN_BATCH: u64 = 1024;

//======================================================================================================================
// Structures
//======================================================================================================================

/// How a pool unit spends the cost of a compute step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkModel {
    /// Burn CPU for the whole cost.
    Spin,
    /// Sleep for the whole cost. Timing stays accurate on machines with fewer cores than units.
    Sleep,
}

/// A parallel-capable compute step tagged with where it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ComputeJob {
    pub task_id: TaskId,
    pub step_index: usize,
    pub work_units: u64,
}

/// Result of one batch submitted to the pool.
#[derive(Debug)]
pub struct PoolRun {
    pub events: Vec<TraceEvent>,
    /// Output of each job, by submission index. None if the job was skipped.
    pub outputs: Vec<Option<u64>>,
    pub elapsed_ms: u64,
}

/// Hands out units in round-robin order.
#[derive(Clone, Debug)]
pub struct RoundRobin {
    units: usize,
    next: usize,
}

/// Tracks when each unit becomes free, for callers that plan pool work on a run clock instead of real threads.
#[derive(Clone, Debug)]
pub struct UnitLedger {
    free_at_ms: Vec<u64>,
    dispatcher: RoundRobin,
}

/// A job on its way to a unit.
struct Assignment {
    index: usize,
    job: ComputeJob,
    origin: Instant,
    token: CancellationToken,
    done_tx: Sender<JobDone>,
}

struct JobDone {
    index: usize,
    output: Option<u64>,
}

struct Unit {
    tx: Option<Sender<Assignment>>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    units: Vec<Unit>,
    recorder: Arc<TraceRecorder>,
    /// Serializes batches so that their events never interleave in the recorder.
    batch_lock: Mutex<()>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WorkModel {
    /// Spends `cost` according to this model and returns a value derived from the work done.
    pub fn perform(&self, cost: Duration) -> u64 {
        match self {
            WorkModel::Spin => spin_for(cost),
            WorkModel::Sleep => {
                thread::sleep(cost);
                cost.as_millis() as u64
            },
        }
    }
}

impl ComputeJob {
    pub fn new(task_id: TaskId, step_index: usize, work_units: u64) -> Self {
        Self {
            task_id,
            step_index,
            work_units,
        }
    }
}

impl RoundRobin {
    pub fn new(units: usize) -> Self {
        assert!(units > 0, "round robin over zero units");
        Self { units, next: 0 }
    }

    pub fn next_unit(&mut self) -> usize {
        let unit: usize = self.next;
        self.next = (self.next + 1) % self.units;
        unit
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

impl UnitLedger {
    pub fn new(units: usize) -> Self {
        Self {
            free_at_ms: vec![0; units],
            dispatcher: RoundRobin::new(units),
        }
    }

    /// Assigns a job of `cost_ms` submitted at `now_ms` to the next unit. Returns the unit and the interval during
    /// which the job runs there.
    pub fn dispatch(&mut self, now_ms: u64, cost_ms: u64) -> (usize, u64, u64) {
        let unit: usize = self.dispatcher.next_unit();
        let start_ms: u64 = self.free_at_ms[unit].max(now_ms);
        let end_ms: u64 = start_ms.saturating_add(cost_ms);
        self.free_at_ms[unit] = end_ms;
        (unit, start_ms, end_ms)
    }

    pub fn reset(&mut self) {
        self.free_at_ms.iter_mut().for_each(|free_at| *free_at = 0);
        self.dispatcher.reset();
    }
}

impl WorkerPool {
    /// Spawns `pool_size` worker threads.
    pub fn new(pool_size: usize, model: WorkModel, ms_per_work_unit: u64) -> Result<Self, Fail> {
        if pool_size == 0 {
            let cause: &str = "worker pool needs at least one unit";
            error!("new(): {}", cause);
            return Err(Fail::invalid(cause));
        }
        if ms_per_work_unit == 0 {
            let cause: &str = "work units must have a non-zero cost";
            error!("new(): {}", cause);
            return Err(Fail::invalid(cause));
        }

        let recorder: Arc<TraceRecorder> = Arc::new(TraceRecorder::new());
        let mut units: Vec<Unit> = Vec::with_capacity(pool_size);
        for unit in 0..pool_size {
            let (tx, rx): (Sender<Assignment>, Receiver<Assignment>) = crossbeam_channel::unbounded();
            let recorder: Arc<TraceRecorder> = recorder.clone();
            let handle: JoinHandle<()> = thread::Builder::new()
                .name(format!("worker-{}", unit))
                .spawn(move || worker_loop(unit, rx, recorder, model, ms_per_work_unit))?;
            units.push(Unit {
                tx: Some(tx),
                handle: Some(handle),
            });
        }
        debug!("new(): spawned worker pool (pool_size={:?}, model={:?})", pool_size, model);

        Ok(Self {
            units,
            recorder,
            batch_lock: Mutex::new(()),
        })
    }

    /// Spawns one unit per available processor.
    pub fn with_available_parallelism(model: WorkModel, ms_per_work_unit: u64) -> Result<Self, Fail> {
        Self::new(available_parallelism(), model, ms_per_work_unit)
    }

    pub fn pool_size(&self) -> usize {
        self.units.len()
    }

    /// Runs `jobs` across the pool and returns the events of the batch.
    pub fn submit_parallel(&self, jobs: &[ComputeJob]) -> Result<Vec<TraceEvent>, Fail> {
        Ok(self.submit_parallel_with(jobs, &CancellationToken::new())?.events)
    }

    /// Runs `jobs` across the pool. Job `i` goes to unit `i % pool_size`. Jobs that have not started when `token`
    /// fires are skipped.
    pub fn submit_parallel_with(&self, jobs: &[ComputeJob], token: &CancellationToken) -> Result<PoolRun, Fail> {
        let _batch = match self.batch_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for job in jobs {
            if job.work_units == 0 {
                let cause: String = format!("compute job without work (task_id={:?})", job.task_id);
                error!("submit_parallel_with(): {}", cause);
                return Err(Fail::invalid(&cause));
            }
        }

        let origin: Instant = Instant::now();
        let (done_tx, done_rx): (Sender<JobDone>, Receiver<JobDone>) = crossbeam_channel::unbounded();
        let mut dispatcher: RoundRobin = RoundRobin::new(self.units.len());
        for (index, job) in jobs.iter().enumerate() {
            let unit: usize = dispatcher.next_unit();
            let assignment: Assignment = Assignment {
                index,
                job: *job,
                origin,
                token: token.clone(),
                done_tx: done_tx.clone(),
            };
            let sent: bool = match &self.units[unit].tx {
                Some(tx) => tx.send(assignment).is_ok(),
                None => {
                    drop(assignment);
                    false
                },
            };
            if !sent {
                let cause: String = format!("worker is gone (unit={:?})", unit);
                error!("submit_parallel_with(): {}", cause);
                drop(done_tx);
                self.discard_batch(done_rx);
                return Err(Fail::new(libc::EIO, &cause));
            }
        }
        drop(done_tx);

        let mut outputs: Vec<Option<u64>> = vec![None; jobs.len()];
        for _ in 0..jobs.len() {
            match done_rx.recv() {
                Ok(done) => outputs[done.index] = done.output,
                Err(_) => {
                    let cause: &str = "worker exited before finishing its jobs";
                    error!("submit_parallel_with(): {}", cause);
                    self.discard_batch(done_rx);
                    return Err(Fail::new(libc::EIO, cause));
                },
            }
        }

        let elapsed_ms: u64 = origin.elapsed().as_millis() as u64;
        debug!(
            "submit_parallel_with(): batch done (jobs={:?}, elapsed_ms={:?})",
            jobs.len(),
            elapsed_ms
        );
        Ok(PoolRun {
            events: self.recorder.drain(),
            outputs,
            elapsed_ms,
        })
    }

    /// Waits for the jobs of a failed batch that are still out, then drops their events.
    fn discard_batch(&self, done_rx: Receiver<JobDone>) {
        // Ends once every assignment of the batch, and with it its completion sender, is gone.
        for _ in done_rx.iter() {}
        let discarded: Vec<TraceEvent> = self.recorder.drain();
        debug!("discard_batch(): dropped {} events", discarded.len());
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Number of processors available to this process.
pub fn available_parallelism() -> usize {
    thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

fn worker_loop(
    unit: usize,
    rx: Receiver<Assignment>,
    recorder: Arc<TraceRecorder>,
    model: WorkModel,
    ms_per_work_unit: u64,
) {
    trace!("worker_loop(): unit {} up", unit);
    while let Ok(assignment) = rx.recv() {
        let Assignment {
            index,
            job,
            origin,
            token,
            done_tx,
        } = assignment;
        let lane: Lane = Lane::Worker(unit);

        let now_ms: u64 = origin.elapsed().as_millis() as u64;
        if token.is_cancelled_at(now_ms) {
            recorder.record(TraceEvent::new(job.task_id, job.step_index, lane, TraceKind::Cancelled, now_ms));
            let _ = done_tx.send(JobDone { index, output: None });
            continue;
        }

        recorder.record(TraceEvent::new(job.task_id, job.step_index, lane, TraceKind::Start, now_ms));
        let cost: Duration = Duration::from_millis(job.work_units.saturating_mul(ms_per_work_unit));
        let output: u64 = model.perform(cost);
        let now_ms: u64 = origin.elapsed().as_millis() as u64;
        recorder.record(TraceEvent::new(job.task_id, job.step_index, lane, TraceKind::Finish, now_ms));

        let _ = done_tx.send(JobDone {
            index,
            output: Some(output),
        });
    }
    trace!("worker_loop(): unit {} down", unit);
}

/// CPU-intensive work: sum of squares until `cost` has elapsed.
fn spin_for(cost: Duration) -> u64 {
    let start: Instant = Instant::now();
    let mut sum: u64 = 0;
    let mut i: u64 = 0;
    while start.elapsed() < cost {
        for _ in 0..SPIN_BATCH {
            sum = sum.wrapping_add(black_box(i).wrapping_mul(black_box(i)));
            i = i.wrapping_add(1);
        }
    }
    sum
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for WorkModel {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spin" => Ok(WorkModel::Spin),
            "sleep" => Ok(WorkModel::Sleep),
            _ => Err(Fail::invalid(&format!("unknown work model {:?}", s))),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channels lets every worker drain its queue and exit.
        for unit in self.units.iter_mut() {
            unit.tx.take();
        }
        for (id, unit) in self.units.iter_mut().enumerate() {
            if let Some(handle) = unit.handle.take() {
                if handle.join().is_err() {
                    warn!("drop(): worker panicked (unit={:?})", id);
                }
            }
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
