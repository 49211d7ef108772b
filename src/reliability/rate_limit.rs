//! Shared token-bucket rate limiter.
//!
//! One limiter guards every outbound provider call in the process, across
//! all chunks, waves, runs and phases. Waiting is the only cooperative
//! suspension point inside a call and returns immediately on cancellation.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ClassifyError, Result};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `burst` calls may go out back to back; the sustained rate is
    /// `requests_per_minute`.
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_rate: f64::from(requests_per_minute.max(1)) / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token without waiting. On failure returns how long until a
    /// token will be available.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    /// Wait until the shared budget admits one call.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ClassifyError::Cancelled);
            }
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClassifyError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_throttle() {
        let limiter = RateLimiter::new(60, 2);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        // Third call has to wait for one refill (1 token per second).
        limiter.acquire(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(990));
    }

    #[test]
    fn try_acquire_reports_wait() {
        let limiter = RateLimiter::new(60, 1);
        assert!(limiter.try_acquire().is_ok());
        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(1, 1);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });
        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert_eq!(err, ClassifyError::Cancelled);
    }
}
