// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod run;
mod slot;

//==============================================================================
// Exports
//==============================================================================

#[allow(clippy::module_inception)]
pub mod scheduler;

pub use self::{
    run::{
        RunConfig,
        RunOutcome,
        RunReport,
        RunSummary,
        DEFAULT_MS_PER_WORK_UNIT,
        DEFAULT_SLOT_COUNT,
    },
    scheduler::CooperativeScheduler,
    slot::SlotTable,
};
pub use crate::runtime::timer::ClockKind;
