use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{DefaultDirectRateLimiter, Quota};

/// Token bucket shared by every worker.
///
/// Each outbound request takes one token. The bucket refills at
/// `requests_per_second` and never holds more than `burst` tokens, so over any
/// window of `t` seconds at most `burst + t * requests_per_second` requests pass.
pub struct RateLimiter {
    bucket: DefaultDirectRateLimiter,
    granted: AtomicU64,
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(non_zero(requests_per_second)).allow_burst(non_zero(burst));
        Self {
            bucket: governor::RateLimiter::direct(quota),
            granted: AtomicU64::new(0),
        }
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        self.bucket.until_ready().await;
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn try_acquire(&self) -> bool {
        let ok = self.bucket.check().is_ok();
        if ok {
            self.granted.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Total tokens handed out since creation.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_burst_is_immediate() {
        let limiter = RateLimiter::new(1, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.granted(), 3);
    }

    #[tokio::test]
    async fn test_rate_after_burst() {
        let limiter = RateLimiter::new(20, 2);
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire().await;
        }
        // 4 tokens beyond the burst at 20/s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(180), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
        assert_eq!(limiter.granted(), 6);
    }

    #[tokio::test]
    async fn test_shared_across_tasks_bounds_aggregate_rate() {
        let limiter = Arc::new(RateLimiter::new(50, 5));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    limiter.acquire().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 20 tokens, 5 from the initial burst, 15 more at 50/s.
        assert!(start.elapsed() >= Duration::from_millis(280));
        assert_eq!(limiter.granted(), 20);
    }

    #[tokio::test]
    async fn test_refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(20, 2);
        limiter.acquire().await;
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
