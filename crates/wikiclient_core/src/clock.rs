use std::thread;
use std::time::{Duration, Instant};

/// Time source for rate limiting and retry backoff.
///
/// Production code uses [`SystemClock`]; tests substitute a manual clock whose
/// `sleep` advances simulated time instead of blocking.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
