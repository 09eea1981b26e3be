// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Task sets that contrast suspending waits with blocking compute.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    task::{
        Step,
        TaskDescriptor,
    },
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::str::FromStr;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Work units of one "find a big prime" step.
const HEAVY_COMPUTE_UNITS: u64 = 2000;
/// Work units of one "print a line" step.
const LIGHT_COMPUTE_UNITS: u64 = 5;

pub const DEFAULT_WAITER_COUNT: usize = 10_000;
pub const DEFAULT_WAITER_DURATION_MS: u64 = 10;
pub const DEFAULT_MIX_SEED: u64 = 42;
pub const DEFAULT_MIX_COUNT: usize = 16;

/// Names accepted by [Scenario::from_str].
pub const SCENARIO_NAMES: [&str; 6] = [
    "non-blocking-launch",
    "io-blocking-mix",
    "cpu-blocking-mix",
    "offloaded-compute",
    "many-waiters",
    "random-mix",
];

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scenario {
    NonBlockingLaunch,
    IoBlockingMix,
    CpuBlockingMix,
    OffloadedCompute,
    ManyWaiters { count: usize, duration_ms: u64 },
    RandomMix { seed: u64, count: usize },
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scenario {
    pub fn build(&self) -> Result<Vec<TaskDescriptor>, Fail> {
        match *self {
            Scenario::NonBlockingLaunch => non_blocking_launch(),
            Scenario::IoBlockingMix => io_blocking_mix(),
            Scenario::CpuBlockingMix => cpu_blocking_mix(),
            Scenario::OffloadedCompute => offloaded_compute(),
            Scenario::ManyWaiters { count, duration_ms } => many_waiters(count, duration_ms),
            Scenario::RandomMix { seed, count } => random_mix(seed, count),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// A task that waits 20 times next to a task that blocks its slot 11 times.
pub fn non_blocking_launch() -> Result<Vec<TaskDescriptor>, Fail> {
    Ok(vec![
        TaskDescriptor::new(1, repeat(Step::wait(100), 20))?,
        TaskDescriptor::new(2, repeat(Step::compute(200), 11))?,
    ])
}

/// Six tasks where only short compute steps ever hold a slot.
pub fn io_blocking_mix() -> Result<Vec<TaskDescriptor>, Fail> {
    let mut tasks: Vec<TaskDescriptor> = Vec::with_capacity(6);
    for id in 1..=6 {
        let steps: Vec<Step> = match id {
            1 | 2 | 6 => repeat(Step::wait(1000), 10),
            4 => repeat(Step::wait(300), 10),
            _ => repeat(Step::compute(LIGHT_COMPUTE_UNITS), 10),
        };
        tasks.push(TaskDescriptor::new(id, steps)?);
    }
    Ok(tasks)
}

/// Six tasks where three of them run one large compute step each.
pub fn cpu_blocking_mix() -> Result<Vec<TaskDescriptor>, Fail> {
    let mut tasks: Vec<TaskDescriptor> = Vec::with_capacity(6);
    for id in 1..=6 {
        let steps: Vec<Step> = match id {
            1 | 2 | 6 => vec![Step::parallel(HEAVY_COMPUTE_UNITS)],
            4 => repeat(Step::wait(300), 10),
            _ => repeat(Step::compute(LIGHT_COMPUTE_UNITS), 10),
        };
        tasks.push(TaskDescriptor::new(id, steps)?);
    }
    Ok(tasks)
}

/// One large compute step followed by a series of waits.
pub fn offloaded_compute() -> Result<Vec<TaskDescriptor>, Fail> {
    let mut steps: Vec<Step> = vec![Step::parallel(HEAVY_COMPUTE_UNITS)];
    steps.extend(repeat(Step::wait(1000), 5));
    Ok(vec![TaskDescriptor::new(1, steps)?])
}

/// `count` tasks that each wait once for `duration_ms`.
pub fn many_waiters(count: usize, duration_ms: u64) -> Result<Vec<TaskDescriptor>, Fail> {
    (1..=count as u64)
        .map(|id| TaskDescriptor::new(id, vec![Step::wait(duration_ms)]))
        .collect()
}

/// `count` tasks with random steps. The same seed always yields the same tasks.
pub fn random_mix(seed: u64, count: usize) -> Result<Vec<TaskDescriptor>, Fail> {
    let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
    let mut tasks: Vec<TaskDescriptor> = Vec::with_capacity(count);
    for id in 1..=count as u64 {
        let len: usize = rng.gen_range(1..=6);
        let steps: Vec<Step> = (0..len)
            .map(|_| match rng.gen_range(0..10) {
                0..=4 => Step::wait(rng.gen_range(10..=500)),
                5..=7 => Step::compute(rng.gen_range(1..=200)),
                _ => Step::parallel(rng.gen_range(50..=500)),
            })
            .collect();
        tasks.push(TaskDescriptor::new(id, steps)?);
    }
    Ok(tasks)
}

fn repeat(step: Step, times: usize) -> Vec<Step> {
    vec![step; times]
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Scenario {
    type Err = Fail;

    /// Parametrized scenarios come back with their default parameters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "non-blocking-launch" => Ok(Scenario::NonBlockingLaunch),
            "io-blocking-mix" => Ok(Scenario::IoBlockingMix),
            "cpu-blocking-mix" => Ok(Scenario::CpuBlockingMix),
            "offloaded-compute" => Ok(Scenario::OffloadedCompute),
            "many-waiters" => Ok(Scenario::ManyWaiters {
                count: DEFAULT_WAITER_COUNT,
                duration_ms: DEFAULT_WAITER_DURATION_MS,
            }),
            "random-mix" => Ok(Scenario::RandomMix {
                seed: DEFAULT_MIX_SEED,
                count: DEFAULT_MIX_COUNT,
            }),
            _ => Err(Fail::invalid(&format!("unknown scenario {:?}", s))),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
