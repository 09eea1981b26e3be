// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod cancel;
pub mod fail;
pub mod logging;
pub mod pool;
pub mod scheduler;
pub mod task;
pub mod threads;
pub mod timer;
pub mod trace;
