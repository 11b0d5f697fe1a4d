//! Shared poll state: budget, test runs, last-seen ids and failure tallies.
//!
//! Every transition happens under one mutex so concurrent probes can never
//! double-spend the budget or lose a failure increment.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ProbeConfig;

/// Linear backoff: `base + step * failures`, capped at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub step: Duration,
    pub ceiling: Duration,
}

impl TimeoutPolicy {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_timeout_secs),
            step: Duration::from_secs(config.backoff_step_secs),
            ceiling: Duration::from_secs(config.max_timeout_secs),
        }
    }

    pub fn timeout_for(&self, failures: u32) -> Duration {
        self.base
            .saturating_add(self.step.saturating_mul(failures))
            .min(self.ceiling)
    }
}

/// Result of asking to dispatch a detected video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// A ticket was spent; the caller must enqueue exactly one job.
    Granted { budget_left: u32, forced: bool },
    /// Same id as last seen and no test runs left.
    AlreadySeen,
    BudgetExhausted,
}

#[derive(Debug, Default)]
struct Inner {
    budget: u32,
    test_runs: u32,
    last_seen: HashMap<String, String>,
    failures: HashMap<String, u32>,
}

#[derive(Debug)]
pub struct Tracker {
    policy: TimeoutPolicy,
    inner: Mutex<Inner>,
}

impl Tracker {
    pub fn new(budget: u32, test_runs: u32, policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner {
                budget,
                test_runs,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // No method panics mid-update, so a poisoned lock still holds valid state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check budget, compare with last-seen, spend a ticket and move the
    /// cursor, all in one step.
    pub fn claim(&self, channel_id: &str, video_id: &str) -> Claim {
        let mut inner = self.lock();
        let seen = inner.last_seen.get(channel_id).map(String::as_str) == Some(video_id);
        if seen && inner.test_runs == 0 {
            return Claim::AlreadySeen;
        }
        if inner.budget == 0 {
            return Claim::BudgetExhausted;
        }
        inner.budget -= 1;
        if seen {
            inner.test_runs -= 1;
        }
        inner
            .last_seen
            .insert(channel_id.to_string(), video_id.to_string());
        Claim::Granted {
            budget_left: inner.budget,
            forced: seen,
        }
    }

    /// Startup pass: set the cursor without spending anything.
    pub fn seed(&self, channel_id: &str, video_id: &str) {
        self.lock()
            .last_seen
            .insert(channel_id.to_string(), video_id.to_string());
    }

    pub fn last_seen(&self, channel_id: &str) -> Option<String> {
        self.lock().last_seen.get(channel_id).cloned()
    }

    pub fn last_seen_snapshot(&self) -> HashMap<String, String> {
        self.lock().last_seen.clone()
    }

    /// Count a transient failure; returns the new consecutive count.
    pub fn record_failure(&self, channel_id: &str) -> u32 {
        let mut inner = self.lock();
        let count = inner.failures.entry(channel_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn record_success(&self, channel_id: &str) {
        self.lock().failures.remove(channel_id);
    }

    pub fn failures(&self, channel_id: &str) -> u32 {
        self.lock().failures.get(channel_id).copied().unwrap_or(0)
    }

    /// Timeout for the next probe of `channel_id`.
    pub fn timeout_for(&self, channel_id: &str) -> Duration {
        self.policy.timeout_for(self.failures(channel_id))
    }

    pub fn budget(&self) -> u32 {
        self.lock().budget
    }

    pub fn test_runs(&self) -> u32 {
        self.lock().test_runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy {
            base: Duration::from_secs(10),
            step: Duration::from_secs(5),
            ceiling: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_first_detection_spends_one_ticket() {
        let tracker = Tracker::new(5, 0, policy());
        assert_eq!(
            tracker.claim("C1", "v100"),
            Claim::Granted { budget_left: 4, forced: false }
        );
        assert_eq!(tracker.budget(), 4);
        assert_eq!(tracker.last_seen("C1").as_deref(), Some("v100"));

        assert_eq!(tracker.claim("C1", "v100"), Claim::AlreadySeen);
        assert_eq!(tracker.budget(), 4);
    }

    #[test]
    fn test_new_video_after_seed_is_granted() {
        let tracker = Tracker::new(2, 0, policy());
        tracker.seed("C1", "old");
        assert_eq!(tracker.budget(), 2);
        assert_eq!(tracker.claim("C1", "old"), Claim::AlreadySeen);
        assert!(matches!(tracker.claim("C1", "new"), Claim::Granted { .. }));
    }

    #[test]
    fn test_budget_never_goes_below_zero() {
        let tracker = Tracker::new(1, 0, policy());
        assert!(matches!(tracker.claim("C1", "a"), Claim::Granted { budget_left: 0, .. }));
        assert_eq!(tracker.claim("C2", "b"), Claim::BudgetExhausted);
        assert_eq!(tracker.claim("C3", "c"), Claim::BudgetExhausted);
        assert_eq!(tracker.budget(), 0);
        // A refused claim does not move the cursor.
        assert_eq!(tracker.last_seen("C2"), None);
    }

    #[test]
    fn test_test_runs_force_redispatch_of_seen_video() {
        let tracker = Tracker::new(10, 2, policy());
        tracker.seed("C1", "v1");
        assert_eq!(
            tracker.claim("C1", "v1"),
            Claim::Granted { budget_left: 9, forced: true }
        );
        assert_eq!(
            tracker.claim("C1", "v1"),
            Claim::Granted { budget_left: 8, forced: true }
        );
        assert_eq!(tracker.claim("C1", "v1"), Claim::AlreadySeen);
        assert_eq!(tracker.test_runs(), 0);
    }

    #[test]
    fn test_timeout_grows_caps_and_resets() {
        let tracker = Tracker::new(1, 0, policy());
        let mut last = tracker.timeout_for("C2");
        assert_eq!(last, Duration::from_secs(10));

        for _ in 0..6 {
            tracker.record_failure("C2");
            let next = tracker.timeout_for("C2");
            assert!(next > last || next == Duration::from_secs(30));
            last = next;
        }
        assert_eq!(last, Duration::from_secs(30));

        tracker.record_success("C2");
        assert_eq!(tracker.failures("C2"), 0);
        assert_eq!(tracker.timeout_for("C2"), Duration::from_secs(10));
    }

    #[test]
    fn test_three_timeouts_widen_by_three_steps() {
        let tracker = Tracker::new(1, 0, TimeoutPolicy {
            ceiling: Duration::from_secs(60),
            ..policy()
        });
        for _ in 0..3 {
            tracker.record_failure("C2");
        }
        assert_eq!(tracker.failures("C2"), 3);
        assert_eq!(tracker.timeout_for("C2"), Duration::from_secs(25));
    }

    #[test]
    fn test_concurrent_claims_spend_budget_exactly() {
        let tracker = Arc::new(Tracker::new(50, 0, policy()));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|i| {
                            matches!(
                                tracker.claim(&format!("C{}-{}", t, i), "v"),
                                Claim::Granted { .. }
                            )
                        })
                        .count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(tracker.budget(), 0);
    }
}
