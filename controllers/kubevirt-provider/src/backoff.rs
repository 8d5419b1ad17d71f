//! # Fibonacci Backoff
//!
//! Requeue delays for requests whose last run failed. Delays follow the
//! Fibonacci sequence in whole minutes, capped at a maximum:
//! 1m, 1m, 2m, 3m, 5m, 8m, 10m, 10m, ...
//!
//! Each request keeps its own sequence; a successful run resets it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const MINUTE: u64 = 60;

/// Fibonacci delay sequence
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
}

impl FibonacciBackoff {
    /// Sequence starting at `min_minutes` and capped at `max_minutes`.
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
        }
    }

    /// Current delay; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * MINUTE);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        delay
    }

    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Per-request backoff sequences, keyed by `namespace/name`.
#[derive(Debug, Default)]
pub struct RequestBackoffs {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl RequestBackoffs {
    /// Record a failed run of `key` and return how long to wait.
    pub fn next_delay(&self, key: &str) -> Duration {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .next_delay()
    }

    /// Restart the sequence of `key` after a successful run.
    pub fn reset(&self, key: &str) {
        if let Some(backoff) = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            backoff.reset();
        }
    }

    /// Drop all state of `key` once the request is gone.
    pub fn forget(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
