// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cooperative slots versus parallel workers.
//!
//! This crate runs the same set of task descriptors three ways and records what happened as an ordered trace:
//!
//! - [CooperativeScheduler]: many tasks share a few logical slots. A wait step parks its task and hands the slot to
//!   the next ready task, while a compute step holds its slot until it finishes.
//! - [WorkerPool]: compute steps run in parallel on a fixed set of long-lived OS threads.
//! - [ThreadPerTask]: every task gets its own OS thread and simply blocks on waits.

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod runtime;
pub mod scenarios;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    config::Config,
    runtime::{
        cancel::CancellationToken,
        fail::Fail,
        pool::{
            ComputeJob,
            WorkModel,
            WorkerPool,
        },
        scheduler::{
            ClockKind,
            CooperativeScheduler,
            RunConfig,
            RunOutcome,
            RunReport,
            RunSummary,
        },
        task::{
            Step,
            TaskDescriptor,
            TaskId,
        },
        threads::ThreadPerTask,
        trace::{
            Lane,
            TraceEvent,
            TraceKind,
            TraceRecorder,
        },
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, otherwise bails out of the enclosing function with an error.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, otherwise bails out of the enclosing function with an error.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}` at {}:{}",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    }};
}
