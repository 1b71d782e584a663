//! Per-key sliding-window admission control.
//!
//! Each agent key owns an ordered window of admission timestamps. A check
//! prunes entries older than the trailing window, rejects when the window
//! is at capacity, and records the admission otherwise. Rejection is
//! immediate - no queuing or backoff happens here; the orchestrator
//! surfaces a `RateLimited` error to the caller.
//!
//! Windows for distinct keys live in separate dashmap shards, so keys do
//! not contend on one global lock. A single key's window is pruned and
//! appended under the shard's write lock, which is what keeps two
//! concurrent checks from both reading "N-1, admit" and over-admitting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding-window rate limiter keyed by agent id.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given trailing window length.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: DashMap::new(),
        }
    }

    /// Checks admission for `key` against `capacity` events per window.
    ///
    /// Returns `true` and records the event when admitted. The window for
    /// a key is created lazily on first use.
    #[must_use]
    pub fn check(&self, key: &str, capacity: u32) -> bool {
        self.check_at(key, capacity, Instant::now())
    }

    /// Admission check against an explicit clock reading. Split out so
    /// tests can drive the window deterministically.
    fn check_at(&self, key: &str, capacity: u32, now: Instant) -> bool {
        let mut window = self.windows.entry(key.to_string()).or_default();

        let cutoff = now.checked_sub(self.window);
        while let Some(&oldest) = window.front() {
            match cutoff {
                Some(cutoff) if oldest < cutoff => {
                    window.pop_front();
                }
                _ => break,
            }
        }

        if window.len() >= capacity as usize {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Number of recorded admissions currently inside `key`'s window.
    #[must_use]
    pub fn current_count(&self, key: &str) -> usize {
        self.windows.get(key).map_or(0, |w| w.len())
    }
}
