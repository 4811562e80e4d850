use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::Clock;
use crate::error::{Result, WikiError};

/// Upper bound on one wait between admission checks.
const MAX_WAIT: Duration = Duration::from_millis(50);
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Token bucket shared by every outbound request of one executor.
///
/// Refill is lazy: each admission check adds `elapsed_ms * refill_per_ms`
/// tokens, capped at `capacity`. A caller that finds the bucket short sleeps
/// for the time the deficit needs to refill (clamped to 1..=50ms) and checks
/// again, outside the lock.
///
/// There is no queue. Concurrent waiters are admitted in whatever order they
/// re-check, not in arrival order.
pub struct RateLimiter {
    capacity: f64,
    refill_per_ms: f64,
    bucket: Mutex<Bucket>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if capacity == 0 {
            return Err(WikiError::InvalidConfig(
                "rate limiter capacity must be at least 1".to_string(),
            ));
        }
        if !(refill_per_second.is_finite() && refill_per_second > 0.0) {
            return Err(WikiError::InvalidConfig(format!(
                "rate limiter refill must be positive, got {refill_per_second}"
            )));
        }
        let capacity = f64::from(capacity);
        let bucket = Bucket {
            tokens: capacity,
            last_refill: clock.now(),
        };
        Ok(Self {
            capacity,
            refill_per_ms: refill_per_second / 1000.0,
            bucket: Mutex::new(bucket),
            clock,
        })
    }

    /// Block until `n` tokens are available, then deduct them.
    pub fn acquire(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let wanted = f64::from(n);
        if wanted > self.capacity {
            return Err(WikiError::InvalidConfig(format!(
                "cannot acquire {n} tokens from a bucket of capacity {}",
                self.capacity
            )));
        }

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
                self.refill(&mut bucket);
                if bucket.tokens >= wanted {
                    bucket.tokens -= wanted;
                    return Ok(());
                }
                let deficit_ms = (wanted - bucket.tokens) / self.refill_per_ms;
                Duration::from_micros((deficit_ms * 1000.0).ceil() as u64)
            };
            let wait = wait.clamp(MIN_WAIT, MAX_WAIT);
            trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for refill");
            self.clock.sleep(wait);
        }
    }

    /// Current token count after applying any pending refill.
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = self.clock.now();
        let elapsed_ms = now.saturating_duration_since(bucket.last_refill).as_secs_f64() * 1000.0;
        let added = elapsed_ms * self.refill_per_ms;
        if added > 0.0 {
            bucket.tokens = (bucket.tokens + added).min(self.capacity);
            bucket.last_refill = now;
        }
    }
}
