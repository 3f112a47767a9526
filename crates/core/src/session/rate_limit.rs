// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sliding-window rate limiter for `terminal.create`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default rate bucket: 10 creates per 10-second window.
pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Tracks recent `terminal.create` timestamps for one connection. Bounded
/// memory: entries older than `window` are swept on every `try_acquire`
/// call, so the deque never grows past `limit`.
#[derive(Debug)]
pub struct RateBucket {
    limit: u32,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateBucket {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, timestamps: VecDeque::new() }
    }

    /// Attempt to record one event at `now`. Returns `true` (and records
    /// it) iff fewer than `limit` events fall within the trailing `window`.
    /// The 10th call in a fresh window succeeds; the 11th fails.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if self.timestamps.len() as u32 >= self.limit {
            return false;
        }
        self.timestamps.push_back(now);
        true
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }
}

impl Default for RateBucket {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
