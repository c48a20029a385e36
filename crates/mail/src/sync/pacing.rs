//! Sleeping and pacing between batch requests

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::time::Duration;

/// Blocking pause, injectable so tests do not wait on real time
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Keeps steady-state request rate under the service limit
///
/// With one worker this is a fixed pause after every batch. With several
/// workers it becomes a token bucket shared by all of them, handing out one
/// permit per interval, so workers cannot each pace themselves independently.
pub enum Pacer {
    Off,
    Fixed(Duration),
    Shared {
        limiter: DefaultDirectRateLimiter,
        clock: DefaultClock,
    },
}

impl Pacer {
    pub fn new(interval: Duration, concurrency: usize) -> Self {
        if interval.is_zero() {
            return Pacer::Off;
        }
        if concurrency <= 1 {
            return Pacer::Fixed(interval);
        }
        match Quota::with_period(interval) {
            Some(quota) => Pacer::Shared {
                limiter: RateLimiter::direct(quota),
                clock: DefaultClock::default(),
            },
            None => Pacer::Off,
        }
    }

    /// Wait for a permit before submitting a batch (shared mode only)
    pub fn before_batch(&self, sleeper: &dyn Sleeper) {
        if let Pacer::Shared { limiter, clock } = self {
            while let Err(not_until) = limiter.check() {
                sleeper.sleep(not_until.wait_time_from(clock.now()));
            }
        }
    }

    /// Pause after a batch finished, whatever its outcome (fixed mode only)
    pub fn after_batch(&self, sleeper: &dyn Sleeper) {
        if let Pacer::Fixed(interval) = self {
            sleeper.sleep(*interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn test_mode_selection() {
        assert!(matches!(Pacer::new(Duration::ZERO, 1), Pacer::Off));
        assert!(matches!(Pacer::new(Duration::ZERO, 8), Pacer::Off));
        assert!(matches!(Pacer::new(Duration::from_millis(300), 1), Pacer::Fixed(_)));
        assert!(matches!(Pacer::new(Duration::from_millis(300), 4), Pacer::Shared { .. }));
    }

    #[test]
    fn test_fixed_pauses_after_each_batch() {
        let sleeper = RecordingSleeper::default();
        let pacer = Pacer::new(Duration::from_millis(300), 1);
        pacer.before_batch(&sleeper);
        pacer.after_batch(&sleeper);
        pacer.after_batch(&sleeper);
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![Duration::from_millis(300), Duration::from_millis(300)]
        );
    }

    #[test]
    fn test_shared_bucket_spaces_permits() {
        let pacer = Pacer::new(Duration::from_millis(20), 4);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.before_batch(&ThreadSleeper);
            pacer.after_batch(&ThreadSleeper);
        }
        // First permit is immediate, the next three wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}
