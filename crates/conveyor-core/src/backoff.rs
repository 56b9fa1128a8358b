//! Backoff policy: decides retry delays for one task.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Delay before the first retry.
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for any single delay.
pub const MAX_DELAY: Duration = Duration::from_secs(5);

/// Fraction of the delay used as jitter amplitude.
pub const DEFAULT_JITTER: f64 = 0.2;

const MAX_EXPONENT: u32 = 32;

/// Capped exponential backoff with jitter, for a bounded number of attempts.
///
/// One `Backoff` lives for the attempt sequence of a single task and is dropped
/// when the task reaches a terminal status.
///
/// Example with the defaults (before jitter):
/// - attempt 0: 100ms
/// - attempt 1: 200ms
/// - attempt 2: 400ms
/// - ...
/// - attempt 6 and later: capped at 5s
#[derive(Debug, Clone)]
pub struct Backoff {
    jitter: f64,
    max_attempts: u32,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    /// Backoff seeded from OS entropy.
    pub fn new(max_attempts: u32) -> Self {
        Self::with_rng(max_attempts, StdRng::from_entropy())
    }

    /// Backoff with an injected random source (tests seed this).
    pub fn with_rng(max_attempts: u32, rng: StdRng) -> Self {
        Self {
            jitter: DEFAULT_JITTER,
            max_attempts,
            attempt: 0,
            rng,
        }
    }

    /// Delay to wait before the next retry, or `None` once retries are exhausted.
    ///
    /// `None` is terminal: the caller must mark the task as failed.
    pub fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        // past the cap the exponent no longer matters; keep the math finite
        let exponent = self.attempt.min(MAX_EXPONENT) as i32;
        let delay = BASE_DELAY.as_secs_f64() * 2f64.powi(exponent);

        let spread = self.rng.gen_range(-1.0..=1.0) * self.jitter * delay;
        let jittered = (delay + spread).clamp(0.0, MAX_DELAY.as_secs_f64());

        self.attempt += 1;
        Some(Duration::from_secs_f64(jittered))
    }

    /// Start the sequence over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const EPS: f64 = 1e-9;

    fn seeded(max_attempts: u32, seed: u64) -> Backoff {
        Backoff::with_rng(max_attempts, StdRng::seed_from_u64(seed))
    }

    /// Nominal (unjittered) delay for attempt `k`, in seconds.
    fn nominal(k: u32) -> f64 {
        BASE_DELAY.as_secs_f64() * 2f64.powi(k as i32)
    }

    #[test]
    fn yields_exactly_max_attempts_delays() {
        let mut backoff = seeded(3, 7);

        assert!(backoff.next().is_some());
        assert!(backoff.next().is_some());
        assert!(backoff.next().is_some());
        assert_eq!(backoff.next(), None);
        // stays exhausted
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn zero_attempts_is_exhausted_immediately() {
        let mut backoff = seeded(0, 1);
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempt(), 0);
    }

    #[rstest]
    #[case::seed_1(1)]
    #[case::seed_42(42)]
    #[case::seed_1337(1337)]
    #[case::seed_max(u64::MAX)]
    fn delays_stay_within_jitter_bounds(#[case] seed: u64) {
        let mut backoff = seeded(10, seed);
        let cap = MAX_DELAY.as_secs_f64();

        for k in 0..10 {
            let delay = backoff.next().expect("attempts remain").as_secs_f64();
            let low = (nominal(k) * (1.0 - DEFAULT_JITTER)).min(cap);
            let high = (nominal(k) * (1.0 + DEFAULT_JITTER)).min(cap);
            assert!(
                delay >= low - EPS && delay <= high + EPS,
                "attempt {k}: {delay}s not in [{low}, {high}]"
            );
        }
    }

    #[test]
    fn delays_are_capped_at_max() {
        let mut backoff = seeded(12, 99);
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next()).collect();

        assert_eq!(delays.len(), 12);
        // 100ms * 2^6 * 0.8 = 5.12s, already above the cap
        for d in &delays[6..] {
            assert_eq!(*d, MAX_DELAY);
        }
        assert!(delays.iter().all(|d| *d <= MAX_DELAY));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = seeded(u32::MAX, 3);
        backoff.attempt = 5_000;
        assert_eq!(backoff.next(), Some(MAX_DELAY));
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let mut a = seeded(5, 2024);
        let mut b = seeded(5, 2024);
        for _ in 0..5 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = seeded(2, 11);
        backoff.next();
        backoff.next();
        assert_eq!(backoff.next(), None);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);

        let first = backoff.next().expect("reset grants attempts again").as_secs_f64();
        assert!(first >= nominal(0) * 0.8 - EPS && first <= nominal(0) * 1.2 + EPS);
    }
}
