//! Restart policy
//!
//! Per-process sliding window over past restart attempts. A crash is
//! restarted after a cooldown while the attempt count inside the window
//! stays under the limit; exceeding the limit is terminal.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Verdict for a degraded process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Attempt another restart (after the configured cooldown)
    Restart,

    /// Attempt limit exhausted within the window; stop trying
    GiveUp,
}

/// Sliding-window restart policy
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    window: Duration,
    max_attempts: u32,
    cooldown: Duration,
}

impl RestartPolicy {
    pub fn new(window: Duration, max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            window,
            max_attempts,
            cooldown,
        }
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide for a process with the given attempt history. Expired
    /// attempts are pruned from the front of the history in place.
    pub fn decide(&self, history: &mut AttemptHistory) -> RestartDecision {
        self.decide_at(history, Instant::now())
    }

    fn decide_at(&self, history: &mut AttemptHistory, now: Instant) -> RestartDecision {
        history.prune(now, self.window);
        if history.len() >= self.max_attempts as usize {
            RestartDecision::GiveUp
        } else {
            RestartDecision::Restart
        }
    }
}

/// Timestamps of past restart attempts for one process
#[derive(Debug, Clone, Default)]
pub struct AttemptHistory {
    attempts: VecDeque<Instant>,
}

impl AttemptHistory {
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    fn record_at(&mut self, at: Instant) {
        self.attempts.push_back(at);
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.attempts.front() {
            if now.duration_since(front) > window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy::new(Duration::from_secs(60), 3, Duration::from_secs(5))
    }

    #[test]
    fn test_restarts_under_the_limit() {
        let policy = policy();
        let mut history = AttemptHistory::default();
        let t0 = Instant::now();

        for i in 0..3 {
            let now = t0 + Duration::from_secs(i * 5);
            assert_eq!(policy.decide_at(&mut history, now), RestartDecision::Restart);
            history.record_at(now);
        }
    }

    #[test]
    fn test_fourth_crash_in_window_gives_up() {
        let policy = policy();
        let mut history = AttemptHistory::default();
        let t0 = Instant::now();

        // Four crashes within 20 seconds, limit 3
        for i in 0..3 {
            let now = t0 + Duration::from_secs(i * 5);
            assert_eq!(policy.decide_at(&mut history, now), RestartDecision::Restart);
            history.record_at(now);
        }
        assert_eq!(
            policy.decide_at(&mut history, t0 + Duration::from_secs(20)),
            RestartDecision::GiveUp
        );
    }

    #[test]
    fn test_spread_out_crashes_keep_restarting() {
        let policy = policy();
        let mut history = AttemptHistory::default();
        let t0 = Instant::now();

        // Three crashes across ten minutes with a one-minute window:
        // each falls outside the window of the previous one
        for i in 0..3 {
            let now = t0 + Duration::from_secs(i * 300);
            assert_eq!(policy.decide_at(&mut history, now), RestartDecision::Restart);
            history.record_at(now);
            assert_eq!(history.len(), 1);
        }
    }

    #[test]
    fn test_window_expiry_frees_budget() {
        let policy = policy();
        let mut history = AttemptHistory::default();
        let t0 = Instant::now();

        for i in 0..3 {
            history.record_at(t0 + Duration::from_secs(i));
        }
        assert_eq!(
            policy.decide_at(&mut history, t0 + Duration::from_secs(10)),
            RestartDecision::GiveUp
        );

        // Window slides past the earlier attempts
        assert_eq!(
            policy.decide_at(&mut history, t0 + Duration::from_secs(90)),
            RestartDecision::Restart
        );
    }
}
