// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::crossbeam_channel::{
    self,
    Receiver,
    RecvTimeoutError,
    Sender,
};
use ::std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct TokenState {
    cancelled: AtomicBool,
    /// Run-clock time at which the token fires on its own, if any.
    deadline_ms: Option<u64>,
    /// Wakes up a runner that is sleeping on the wall clock.
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Caller-supplied cancellation signal. Runners only look at it between steps.
#[derive(Clone)]
pub struct CancellationToken(Arc<TokenState>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CancellationToken {
    pub fn new() -> Self {
        Self::with_deadline(None)
    }

    /// Creates a token that fires by itself once the run clock reaches `deadline_ms`.
    pub fn after(deadline_ms: u64) -> Self {
        Self::with_deadline(Some(deadline_ms))
    }

    fn with_deadline(deadline_ms: Option<u64>) -> Self {
        let (wake_tx, wake_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
        Self(Arc::new(TokenState {
            cancelled: AtomicBool::new(false),
            deadline_ms,
            wake_tx,
            wake_rx,
        }))
    }

    /// Fires the token. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::SeqCst) {
            debug!("cancel(): cancellation requested");
            let _ = self.0.wake_tx.try_send(());
        }
    }

    /// Whether [Self::cancel] was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.0.deadline_ms
    }

    /// Whether the token has fired by run-clock time `now_ms`, either explicitly or through its deadline.
    pub fn is_cancelled_at(&self, now_ms: u64) -> bool {
        self.is_cancelled() || self.0.deadline_ms.map_or(false, |deadline| deadline <= now_ms)
    }

    /// Blocks the calling thread until `deadline` or until the token is cancelled, whichever comes first. Returns
    /// true if the token was cancelled.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.is_cancelled() {
                return true;
            }
            match self.0.wake_rx.recv_deadline(deadline) {
                Ok(()) => {
                    // Pass the signal on to any other sleeper.
                    let _ = self.0.wake_tx.try_send(());
                },
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return self.is_cancelled(),
            }
        }
    }

    /// Blocks the calling thread until the token is cancelled.
    pub fn wait_cancelled(&self) {
        while !self.is_cancelled() {
            if self.0.wake_rx.recv().is_ok() {
                let _ = self.0.wake_tx.try_send(());
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
