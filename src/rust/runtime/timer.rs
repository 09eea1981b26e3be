// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    cancel::CancellationToken,
    fail::Fail,
};
use ::core::cmp::Reverse;
use ::std::{
    collections::BinaryHeap,
    str::FromStr,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// How a run clock moves forward.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClockKind {
    /// Jumps straight to the next timer. Runs take no real time and are fully deterministic.
    Virtual,
    /// Sleeps in real time until the next timer, waking early if the run is cancelled.
    Wall,
}

/// Run clock, counting milliseconds from the start of a run.
pub struct Clock {
    kind: ClockKind,
    origin: Instant,
    now_ms: u64,
}

struct TimerQueueEntry<K: Ord> {
    expiry_ms: u64,
    key: K,
}

/// Timers ordered by expiry and then by key, so that timers expiring together fire in key order.
pub struct TimerQueue<K: Ord> {
    // Use a reverse to get a min heap.
    heap: BinaryHeap<Reverse<TimerQueueEntry<K>>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Clock {
    pub fn new(kind: ClockKind) -> Self {
        Self {
            kind,
            origin: Instant::now(),
            now_ms: 0,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Moves the clock forward to `target_ms`. Returns false if `token` was cancelled before the target was reached,
    /// in which case the clock stops at the moment the cancellation was seen.
    pub fn advance_to(&mut self, target_ms: u64, token: &CancellationToken) -> bool {
        assert!(self.now_ms <= target_ms, "clock cannot go backwards");
        match self.kind {
            ClockKind::Virtual => {
                if token.is_cancelled() {
                    return false;
                }
                self.now_ms = target_ms;
                true
            },
            ClockKind::Wall => {
                let cancelled: bool = match self.origin.checked_add(Duration::from_millis(target_ms)) {
                    Some(deadline) => token.sleep_until(deadline),
                    // Past what an instant can hold, so only a cancellation ends the sleep.
                    None => {
                        token.wait_cancelled();
                        true
                    },
                };
                if cancelled {
                    let elapsed: u64 = self.origin.elapsed().as_millis() as u64;
                    self.now_ms = elapsed.clamp(self.now_ms, target_ms);
                    return false;
                }
                self.now_ms = target_ms;
                true
            },
        }
    }
}

impl<K: Ord> TimerQueue<K> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn push(&mut self, expiry_ms: u64, key: K) {
        self.heap.push(Reverse(TimerQueueEntry { expiry_ms, key }));
    }

    /// Expiry of the earliest timer, if any.
    pub fn next_expiry(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.expiry_ms)
    }

    /// Removes every timer that expires at or before `now_ms`, in firing order.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<K> {
        let mut due: Vec<K> = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if now_ms < entry.expiry_ms {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry.key);
            }
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl FromStr for ClockKind {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "virtual" => Ok(ClockKind::Virtual),
            "wall" => Ok(ClockKind::Wall),
            _ => Err(Fail::invalid(&format!("unknown clock {:?}", s))),
        }
    }
}

impl<K: Ord> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> PartialEq for TimerQueueEntry<K> {
    fn eq(&self, other: &TimerQueueEntry<K>) -> bool {
        self.expiry_ms == other.expiry_ms && self.key == other.key
    }
}

impl<K: Ord> Eq for TimerQueueEntry<K> {}

impl<K: Ord> PartialOrd for TimerQueueEntry<K> {
    fn partial_cmp(&self, other: &TimerQueueEntry<K>) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for TimerQueueEntry<K> {
    fn cmp(&self, other: &TimerQueueEntry<K>) -> core::cmp::Ordering {
        // Compare timer queue entries by expiration time, then by key.
        self.expiry_ms
            .cmp(&other.expiry_ms)
            .then_with(|| self.key.cmp(&other.key))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
