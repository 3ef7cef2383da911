//! Pauses between attempts against a host that is not answering yet
//!
//! A freshly booted or reinstalled host may refuse SSH for a while before
//! any command can run on it. [`RetrySchedule`] turns a [`RetryPolicy`] into
//! the sequence of sleeps between connection attempts. It yields one pause
//! fewer than the policy has attempts, so running out of pauses means the
//! budget is spent.

use std::time::Duration;

use kf_core::config::RetryPolicy;
use rand::Rng;

/// Iterator over the sleeps between attempts of one retried operation
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    next: Duration,
    ceiling: Duration,
    growth: f64,
    jitter: f64,
    remaining: u32,
}

impl RetrySchedule {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            next: policy.initial,
            ceiling: policy.max.max(policy.initial),
            growth: policy.multiplier.max(1.0),
            jitter: policy.jitter.clamp(0.0, 1.0),
            remaining: policy.attempts.max(1) - 1,
        }
    }

    /// Pauses left before the budget runs out
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Iterator for RetrySchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let pause = self.next;
        self.next = self.next.mul_f64(self.growth).min(self.ceiling);

        if self.jitter > 0.0 {
            let spread = pause.mul_f64(self.jitter);
            let extra = rand::thread_rng().gen_range(Duration::ZERO..=spread);
            Some(pause + extra)
        } else {
            Some(pause)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_polls_at_fixed_interval() {
        let pauses: Vec<_> = RetrySchedule::new(&RetryPolicy::default()).collect();
        assert_eq!(pauses, vec![Duration::from_secs(1); 5]);
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        let mut schedule = RetrySchedule::new(&RetryPolicy::fixed(1, Duration::from_secs(5)));
        assert_eq!(schedule.remaining(), 0);
        assert_eq!(schedule.next(), None);
    }

    #[test]
    fn test_zero_attempts_behaves_like_one() {
        let schedule = RetrySchedule::new(&RetryPolicy::fixed(0, Duration::from_secs(5)));
        assert_eq!(schedule.count(), 0);
    }

    #[test]
    fn test_slow_boot_waits_grow_to_ceiling() {
        let policy = RetryPolicy {
            attempts: 6,
            initial: Duration::from_secs(2),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        };

        let pauses: Vec<u64> = RetrySchedule::new(&policy).map(|d| d.as_secs()).collect();
        assert_eq!(pauses, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_shrinking_multiplier_is_ignored() {
        let policy = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::fixed(3, Duration::from_millis(200))
        };
        let pauses: Vec<_> = RetrySchedule::new(&policy).collect();
        assert_eq!(pauses, vec![Duration::from_millis(200); 2]);
    }

    #[test]
    fn test_jitter_only_lengthens_pause() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::fixed(50, Duration::from_millis(400))
        };

        for pause in RetrySchedule::new(&policy) {
            assert!(pause >= Duration::from_millis(400));
            assert!(pause <= Duration::from_millis(600));
        }
    }
}
