//! Flow control for the primary outgoing queue.
//!
//! A rate limiter runs before each insert into the bounded lane and may slow
//! the producer down as the queue fills.

use async_trait::async_trait;
use std::time::Duration;

/// Hook invoked around inserts into the rate-limited lane.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Called before an element is inserted. `size` is the current number of
    /// queued elements; implementations may sleep here.
    async fn pre_insert(&self, size: usize);

    /// Called after an element has been inserted.
    fn post_insert(&self, size: usize);
}

/// Rate limiter that never slows anything down.
#[derive(Debug, Default)]
pub struct NullRateLimiter;

#[async_trait]
impl RateLimiter for NullRateLimiter {
    async fn pre_insert(&self, _size: usize) {}

    fn post_insert(&self, _size: usize) {}
}

/// Rate limiter with a quadratically growing delay.
///
/// Once more than a twentieth of the queue capacity is in flight, each insert
/// sleeps `(size / 100)^2` milliseconds:
///
/// ```text
/// 0-99      -> nothing
/// 100-199   -> 1 ms
/// 200-299   -> 4 ms
/// ...
/// 1000-1099 -> 100 ms
/// ```
#[derive(Debug)]
pub struct ExponentialRateLimiter {
    cutoff: usize,
}

impl ExponentialRateLimiter {
    /// Create a limiter tuned for a queue of the given capacity.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            cutoff: queue_capacity / 20,
        }
    }
}

#[async_trait]
impl RateLimiter for ExponentialRateLimiter {
    async fn pre_insert(&self, size: usize) {
        if size > self.cutoff {
            let hundreds = (size / 100) as u64;
            tokio::time::sleep(Duration::from_millis(hundreds * hundreds)).await;
        }
    }

    fn post_insert(&self, _size: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn small_queues_are_not_limited() {
        let limiter = ExponentialRateLimiter::new(2000);
        let start = Instant::now();
        limiter.pre_insert(99).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_grows_with_queue_size() {
        let limiter = ExponentialRateLimiter::new(2000);

        let start = tokio::time::Instant::now();
        limiter.pre_insert(500).await;
        assert_eq!(start.elapsed(), Duration::from_millis(25));

        let start = tokio::time::Instant::now();
        limiter.pre_insert(1000).await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
