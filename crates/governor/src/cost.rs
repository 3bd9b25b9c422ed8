// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Control Plane Contributors

//! Cost ledgers (spec.md §4.2): a per-context running total and a global
//! daily total, each checked before admitting a paid dispatch and charged
//! once real usage is known.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use ctrlplane_core::ControlError;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct CostConfig {
    pub session_limit_usd: f64,
    pub daily_limit_usd: f64,
    pub warn_fraction: f64,
    pub per_1k_tokens_usd: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            session_limit_usd: 5.0,
            daily_limit_usd: 10.0,
            warn_fraction: 0.8,
            per_1k_tokens_usd: 0.0,
        }
    }
}

struct Ledgers {
    context_total: f64,
    /// Whether the context ledger has already crossed `warn_fraction` —
    /// the warning fires only on the first crossing (spec.md §4.2).
    context_warned: bool,
    daily: HashMap<NaiveDate, f64>,
    daily_warned: HashMap<NaiveDate, bool>,
}

impl Default for Ledgers {
    fn default() -> Self {
        Self {
            context_total: 0.0,
            context_warned: false,
            daily: HashMap::new(),
            daily_warned: HashMap::new(),
        }
    }
}

pub struct CostTracker {
    config: CostConfig,
    ledgers: Mutex<Ledgers>,
}

/// Result of successfully charging usage: the cost charged, and whether
/// either ledger crossed `warn_fraction` for the first time as a result.
#[derive(Debug, Clone, Copy)]
pub struct ChargeOutcome {
    pub cost_usd: f64,
    pub crossed_warning: bool,
}

impl CostTracker {
    pub fn new(config: CostConfig) -> Self {
        Self {
            config,
            ledgers: Mutex::new(Ledgers::default()),
        }
    }

    pub fn context_total(&self) -> f64 {
        self.ledgers.lock().context_total
    }

    pub fn daily_total(&self) -> f64 {
        let today = Utc::now().date_naive();
        *self.ledgers.lock().daily.get(&today).unwrap_or(&0.0)
    }

    /// Reject a dispatch whose `projected_usd` would push either ledger
    /// over its limit. Checked and charged under the same lock so two
    /// concurrent dispatches can't both squeak under the ceiling
    /// (spec.md §4.2 "Edge case").
    pub fn check_projected(&self, projected_usd: f64) -> Result<(), ControlError> {
        let today = Utc::now().date_naive();
        let guard = self.ledgers.lock();
        let daily = *guard.daily.get(&today).unwrap_or(&0.0);
        if guard.context_total + projected_usd > self.config.session_limit_usd {
            return Err(ControlError::CostExceeded {
                limit_usd: self.config.session_limit_usd,
                projected_usd: guard.context_total + projected_usd,
            });
        }
        if daily + projected_usd > self.config.daily_limit_usd {
            return Err(ControlError::CostExceeded {
                limit_usd: self.config.daily_limit_usd,
                projected_usd: daily + projected_usd,
            });
        }
        Ok(())
    }

    /// Estimate the cost of `total_tokens` at the configured per-1k rate.
    /// Returns 0 when no rate is configured (usage-report-only pricing,
    /// spec.md §4.2).
    pub fn estimate_tokens(&self, total_tokens: u64) -> f64 {
        (total_tokens as f64 / 1000.0) * self.config.per_1k_tokens_usd
    }

    /// Charge actual usage to both ledgers. Returns whether this charge
    /// crossed `warn_fraction` of either limit for the first time.
    pub fn charge(&self, cost_usd: f64) -> ChargeOutcome {
        let today = Utc::now().date_naive();
        let mut guard = self.ledgers.lock();
        guard.context_total += cost_usd;
        let daily = guard.daily.entry(today).or_insert(0.0);
        *daily += cost_usd;
        let daily_value = *daily;

        let mut crossed = false;
        if !guard.context_warned
            && guard.context_total >= self.config.session_limit_usd * self.config.warn_fraction
        {
            guard.context_warned = true;
            crossed = true;
        }
        let already_warned_today = *guard.daily_warned.get(&today).unwrap_or(&false);
        if !already_warned_today && daily_value >= self.config.daily_limit_usd * self.config.warn_fraction {
            guard.daily_warned.insert(today, true);
            crossed = true;
        }

        ChargeOutcome {
            cost_usd,
            crossed_warning: crossed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(session: f64, daily: f64) -> CostTracker {
        CostTracker::new(CostConfig {
            session_limit_usd: session,
            daily_limit_usd: daily,
            warn_fraction: 0.8,
            per_1k_tokens_usd: 0.0,
        })
    }

    #[test]
    fn at_9_99_accepts_0_01_at_10_00_rejects() {
        let t = tracker(100.0, 10.0);
        t.charge(9.99);
        assert!(t.check_projected(0.01).is_ok());
        t.charge(0.01);
        assert!(t.check_projected(0.01).is_err());
    }

    #[test]
    fn charge_sums_equal_context_total() {
        let t = tracker(100.0, 100.0);
        t.charge(1.0);
        t.charge(2.5);
        assert_eq!(t.context_total(), 3.5);
    }

    #[test]
    fn warning_fires_once_on_first_crossing() {
        let t = tracker(10.0, 100.0);
        let first = t.charge(7.0);
        assert!(!first.crossed_warning); // 0.7 of limit, below 0.8 warn_fraction
        let second = t.charge(1.5);
        assert!(second.crossed_warning); // now 0.85, crosses
        let third = t.charge(0.1);
        assert!(!third.crossed_warning); // already warned
    }
}
