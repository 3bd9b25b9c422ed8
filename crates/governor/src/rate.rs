// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Sliding-window rate limiting (spec.md §4.2).
//!
//! A request is admitted iff both the per-agent and per-source-address
//! windows allow it. Each key's window is checked under its own lock so two
//! concurrent requests from the same key cannot both squeak past the limit
//! (spec.md §4.2 "Edge case").

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ctrlplane_core::ControlError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_admissions: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub const fn per_minute(max_admissions: u32) -> Self {
        Self {
            max_admissions,
            window: Duration::from_secs(60),
        }
    }
}

/// What the caller needs to render `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

struct Window {
    config: RateLimitConfig,
    admissions: VecDeque<Instant>,
}

impl Window {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            admissions: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.admissions.front() {
            if now.duration_since(front) >= self.config.window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the status without mutating state — used to report
    /// `Remaining`/`Reset` on a denial without counting the denial itself
    /// against the window (spec.md §8: "denial is cheap and idempotent").
    fn status(&mut self, now: Instant) -> RateStatus {
        self.prune(now);
        let used = self.admissions.len() as u32;
        let remaining = self.config.max_admissions.saturating_sub(used);
        let reset_secs = self
            .admissions
            .front()
            .map(|&front| {
                let elapsed = now.duration_since(front);
                self.config.window.saturating_sub(elapsed).as_secs()
            })
            .unwrap_or(0);
        RateStatus {
            limit: self.config.max_admissions,
            remaining,
            reset_secs,
        }
    }

    fn try_admit(&mut self, now: Instant) -> Result<RateStatus, RateStatus> {
        self.prune(now);
        if self.admissions.len() as u32 >= self.config.max_admissions {
            return Err(self.status(now));
        }
        self.admissions.push_back(now);
        Ok(self.status(now))
    }

    /// Undo the most recent admission (used to roll back a charge when a
    /// joint admission across two windows turns out to be denied by the
    /// other window).
    fn release_last(&mut self) {
        self.admissions.pop_back();
    }
}

/// A single sliding-window keyed by an arbitrary string (agent id or peer
/// address).
pub struct KeyedRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl KeyedRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_admit(&self, key: &str) -> Result<RateStatus, RateStatus> {
        let mut guard = self.windows.lock();
        let window = guard
            .entry(key.to_string())
            .or_insert_with(|| Window::new(self.config));
        window.try_admit(Instant::now())
    }

    fn release_last(&self, key: &str) {
        if let Some(window) = self.windows.lock().get_mut(key) {
            window.release_last();
        }
    }
}

/// Composes the per-agent and per-source limiters: a request is admitted
/// only if both allow it.
pub struct RateGovernor {
    per_agent: KeyedRateLimiter,
    per_source: KeyedRateLimiter,
}

impl RateGovernor {
    pub fn new(per_agent: RateLimitConfig, per_source: RateLimitConfig) -> Self {
        Self {
            per_agent: KeyedRateLimiter::new(per_agent),
            per_source: KeyedRateLimiter::new(per_source),
        }
    }

    pub fn admit(&self, agent_id: &str, source_addr: &str) -> Result<RateStatus, ControlError> {
        // Each window is atomic on its own (single lock held across
        // check-and-push in `Window::try_admit`), so two concurrent
        // requests for the same key can never both squeak through
        // (spec.md §4.2 "Edge case"). Joint atomicity across the two
        // windows is achieved by admitting the per-agent window first and
        // rolling it back if the per-source window then denies — so a
        // denial never leaves a partial charge on the other ledger
        // (spec.md §7: "never partially applied").
        let agent_status = match self.per_agent.try_admit(agent_id) {
            Ok(status) => status,
            Err(denied) => return Err(to_error(denied)),
        };

        match self.per_source.try_admit(source_addr) {
            Ok(_) => Ok(agent_status),
            Err(denied) => {
                self.per_agent.release_last(agent_id);
                Err(to_error(denied))
            }
        }
    }
}

fn to_error(status: RateStatus) -> ControlError {
    ControlError::RateLimited {
        limit: status.limit,
        remaining: status.remaining,
        reset_secs: status.reset_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenth_admission_succeeds_eleventh_denied() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(10));
        for _ in 0..10 {
            assert!(limiter.try_admit("a1").is_ok());
        }
        let denied = limiter.try_admit("a1").unwrap_err();
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn distinct_keys_have_independent_windows() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(1));
        assert!(limiter.try_admit("a1").is_ok());
        assert!(limiter.try_admit("a2").is_ok());
        assert!(limiter.try_admit("a1").is_err());
    }

    #[test]
    fn governor_requires_both_windows_to_admit() {
        let gov = RateGovernor::new(RateLimitConfig::per_minute(1), RateLimitConfig::per_minute(10));
        assert!(gov.admit("a1", "10.0.0.1").is_ok());
        // per-agent window for a1 is now exhausted even though the source
        // window has headroom.
        assert!(gov.admit("a1", "10.0.0.1").is_err());
    }

    #[test]
    fn denial_does_not_consume_window_budget() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig::per_minute(1));
        assert!(limiter.try_admit("a1").is_ok());
        for _ in 0..5 {
            let denied = limiter.try_admit("a1").unwrap_err();
            assert_eq!(denied.remaining, 0);
        }
    }
}
