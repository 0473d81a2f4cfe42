// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounds how many times a crashed agent loop may be restarted within a
/// sliding window before the session is given up on. Mirrors the
/// bounded-retry shape `relay_core::RetryPolicy` uses for stream errors, at
/// the process level rather than the single-request level.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { max_restarts: 3, window: Duration::from_secs(60) }
    }
}

/// Tracks restart timestamps for one supervised child, pruning entries
/// outside the policy window before deciding whether another restart fits.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    restarts: VecDeque<Instant>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self { policy, restarts: VecDeque::new() }
    }

    /// Records a crash and returns whether a restart is still allowed under
    /// the policy. Call this once per observed crash, before respawning.
    pub fn record_restart(&mut self, now: Instant) -> bool {
        while let Some(front) = self.restarts.front() {
            if now.duration_since(*front) > self.policy.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        if self.restarts.len() as u32 >= self.policy.max_restarts {
            return false;
        }
        self.restarts.push_back(now);
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_restarts_up_to_the_cap() {
        let mut tracker = RestartTracker::new(RestartPolicy { max_restarts: 2, window: Duration::from_secs(60) });
        let t0 = Instant::now();
        assert!(tracker.record_restart(t0));
        assert!(tracker.record_restart(t0));
        assert!(!tracker.record_restart(t0));
    }

    #[test]
    fn old_restarts_fall_out_of_the_window() {
        let mut tracker = RestartTracker::new(RestartPolicy { max_restarts: 1, window: Duration::from_millis(10) });
        let t0 = Instant::now();
        assert!(tracker.record_restart(t0));
        assert!(!tracker.record_restart(t0));
        let later = t0 + Duration::from_millis(20);
        assert!(tracker.record_restart(later));
    }
}
