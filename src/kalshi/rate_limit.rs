//! Token-bucket rate limiting for outbound Kalshi requests.
//!
//! The bucket is consulted by the single request worker, so long-run
//! throughput is exactly bounded by `rate` with bursts up to `capacity`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("rate must be > 0. Got: {0}")]
pub struct InvalidRate(pub f64);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_checked: Instant,
}

/// Token bucket with `capacity = rate` and fractional refill.
#[derive(Debug)]
pub struct TokenBucketRateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketRateLimiter {
    pub fn new(rate: f64) -> Result<Self, InvalidRate> {
        if rate <= 0.0 {
            return Err(InvalidRate(rate));
        }
        Ok(Self {
            rate,
            capacity: rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_checked: Instant::now(),
            }),
        })
    }

    /// Wait until at least one token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let sleep_for = {
                let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_checked).as_secs_f64();
                bucket.last_checked = now;
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64((deficit / self.rate).max(0.0))
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_rate() {
        assert!(TokenBucketRateLimiter::new(0.0).is_err());
        assert!(TokenBucketRateLimiter::new(-3.0).is_err());
    }

    #[tokio::test]
    async fn burst_up_to_capacity_is_free() {
        let limiter = TokenBucketRateLimiter::new(5.0).unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn elapsed_time_lower_bound_holds() {
        // N back-to-back acquires must take at least (N - capacity) / rate.
        let rate = 50.0;
        let n = 60u32;
        let limiter = TokenBucketRateLimiter::new(rate).unwrap();
        let start = Instant::now();
        for _ in 0..n {
            limiter.acquire().await;
        }
        let floor = (f64::from(n) - rate) / rate;
        assert!(
            start.elapsed().as_secs_f64() >= floor,
            "elapsed {:?} under floor {floor}s",
            start.elapsed()
        );
    }
}
