// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::coopsched::{
    runtime::{
        logging,
        pool::PoolRun,
    },
    scenarios::{
        Scenario,
        SCENARIO_NAMES,
    },
    CancellationToken,
    ClockKind,
    ComputeJob,
    Config,
    CooperativeScheduler,
    RunConfig,
    RunOutcome,
    RunReport,
    RunSummary,
    Step,
    TaskDescriptor,
    ThreadPerTask,
    TraceKind,
    WorkerPool,
};
use ::log::{
    info,
    warn,
};
use ::std::str::FromStr;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Runner {
    Cooperative,
    Pool,
    Threads,
}

#[derive(Debug)]
pub struct ProgramArguments {
    scenario: Scenario,
    runner: Runner,
    config: RunConfig,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ProgramArguments {
    const DEFAULT_SCENARIO: &'static str = "io-blocking-mix";
    const DEFAULT_RUNNER: &'static str = "cooperative";

    pub fn new() -> Result<Self> {
        let matches: ArgMatches = Command::new("coopsched")
            .about("Runs a task scenario on cooperative slots, a worker pool or one thread per task")
            .arg(
                Arg::new("scenario")
                    .long("scenario")
                    .value_parser(SCENARIO_NAMES)
                    .default_value(Self::DEFAULT_SCENARIO)
                    .help("Sets the task scenario"),
            )
            .arg(
                Arg::new("runner")
                    .long("runner")
                    .value_parser(["cooperative", "pool", "threads"])
                    .default_value(Self::DEFAULT_RUNNER)
                    .help("Sets what runs the tasks"),
            )
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Reads run options from a YAML file"),
            )
            .arg(
                Arg::new("slots")
                    .long("slots")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .help("Sets the number of cooperative slots"),
            )
            .arg(
                Arg::new("pool-size")
                    .long("pool-size")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .help("Sets the number of worker pool units"),
            )
            .arg(
                Arg::new("no-pool")
                    .long("no-pool")
                    .action(clap::ArgAction::SetTrue)
                    .conflicts_with("pool-size")
                    .help("Runs parallel-capable compute on the cooperative slots"),
            )
            .arg(
                Arg::new("timeout")
                    .long("timeout")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("MILLISECONDS")
                    .help("Sets the time budget of the run"),
            )
            .arg(
                Arg::new("clock")
                    .long("clock")
                    .value_parser(["virtual", "wall"])
                    .required(false)
                    .help("Sets how the cooperative scheduler's clock moves"),
            )
            .arg(
                Arg::new("count")
                    .long("count")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .help("Sets the number of tasks of many-waiters and random-mix"),
            )
            .arg(
                Arg::new("duration")
                    .long("duration")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("MILLISECONDS")
                    .help("Sets the wait of many-waiters"),
            )
            .arg(
                Arg::new("seed")
                    .long("seed")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .help("Sets the seed of random-mix"),
            )
            .get_matches();

        let mut config: RunConfig = match matches.get_one::<String>("config") {
            Some(path) => Config::new(path)?.run_config()?,
            None => RunConfig::default(),
        };
        if let Some(slots) = matches.get_one::<usize>("slots") {
            config.slot_count = *slots;
        }
        if let Some(pool_size) = matches.get_one::<usize>("pool-size") {
            config.pool_size = Some(*pool_size);
        }
        if matches.get_flag("no-pool") {
            config.pool_size = None;
        }
        if let Some(timeout_ms) = matches.get_one::<u64>("timeout") {
            config.timeout_ms = Some(*timeout_ms);
        }
        if let Some(clock) = matches.get_one::<String>("clock") {
            config.clock = ClockKind::from_str(clock)?;
        }
        config.validate()?;

        let scenario_name: &str = match matches.get_one::<String>("scenario") {
            Some(name) => name,
            None => Self::DEFAULT_SCENARIO,
        };
        let scenario: Scenario = match Scenario::from_str(scenario_name)? {
            Scenario::ManyWaiters { count, duration_ms } => Scenario::ManyWaiters {
                count: matches.get_one::<usize>("count").copied().unwrap_or(count),
                duration_ms: matches.get_one::<u64>("duration").copied().unwrap_or(duration_ms),
            },
            Scenario::RandomMix { seed, count } => Scenario::RandomMix {
                seed: matches.get_one::<u64>("seed").copied().unwrap_or(seed),
                count: matches.get_one::<usize>("count").copied().unwrap_or(count),
            },
            scenario => scenario,
        };

        let runner: Runner = match matches.get_one::<String>("runner").map(String::as_str) {
            Some("pool") => Runner::Pool,
            Some("threads") => Runner::Threads,
            _ => Runner::Cooperative,
        };

        Ok(Self {
            scenario,
            runner,
            config,
        })
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs every compute step of `tasks` on a worker pool. Wait steps have no meaning there and are skipped. Jobs that
/// have not started once the timeout has passed are skipped as well.
fn run_on_pool(config: &RunConfig, tasks: &[TaskDescriptor]) -> Result<RunReport> {
    let pool: WorkerPool = match config.pool_size {
        Some(pool_size) => WorkerPool::new(pool_size, config.work_model, config.ms_per_work_unit)?,
        None => WorkerPool::with_available_parallelism(config.work_model, config.ms_per_work_unit)?,
    };
    let mut jobs: Vec<ComputeJob> = Vec::new();
    let mut skipped: usize = 0;
    for task in tasks {
        for (step_index, step) in task.steps().iter().enumerate() {
            match step {
                Step::Compute { work_units, .. } => jobs.push(ComputeJob::new(task.id(), step_index, *work_units)),
                Step::Wait { .. } => skipped += 1,
            }
        }
    }
    if skipped > 0 {
        warn!("run_on_pool(): skipping {} wait steps", skipped);
    }

    let deadline: CancellationToken = match config.timeout_ms {
        Some(timeout_ms) => CancellationToken::after(timeout_ms),
        None => CancellationToken::new(),
    };
    let run: PoolRun = pool.submit_parallel_with(&jobs, &deadline)?;
    // The deadline is the only thing that skips jobs here.
    let outcome: RunOutcome = if run.events.iter().any(|e| e.kind == TraceKind::Cancelled) {
        RunOutcome::TimedOut
    } else {
        RunOutcome::Completed
    };
    Ok(RunReport {
        events: run.events,
        outcome,
        elapsed_ms: run.elapsed_ms,
        lateness_ms: Vec::new(),
    })
}

fn main() -> Result<()> {
    logging::initialize();
    let args: ProgramArguments = ProgramArguments::new()?;
    let tasks: Vec<TaskDescriptor> = args.scenario.build()?;
    info!(
        "main(): running {:?} on {:?} (tasks={:?}, config={:?})",
        args.scenario,
        args.runner,
        tasks.len(),
        args.config
    );

    let report: RunReport = match args.runner {
        Runner::Cooperative => CooperativeScheduler::new(args.config.clone())?.run(&tasks)?,
        Runner::Pool => run_on_pool(&args.config, &tasks)?,
        Runner::Threads => ThreadPerTask::new(args.config.ms_per_work_unit, args.config.work_model)?
            .with_timeout(args.config.timeout_ms)
            .run(&tasks)?,
    };

    for event in &report.events {
        info!("{}", event);
    }
    let summary: RunSummary = report.summary();
    info!(
        "main(): {:?} (makespan_ms={:?}, elapsed_ms={:?}, finished={:?}, cancelled={:?}, mean_lateness_ms={:.1}, \
         max_lateness_ms={:?})",
        report.outcome,
        summary.makespan_ms,
        report.elapsed_ms,
        summary.finished,
        summary.cancelled,
        summary.mean_lateness_ms,
        summary.max_lateness_ms
    );

    Ok(())
}
