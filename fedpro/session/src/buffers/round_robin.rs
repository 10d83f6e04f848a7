//! Fair merge of the two outgoing lanes.
//!
//! Requests initiated locally go through a bounded, rate-limited primary
//! lane; responses to remote traffic go through an unbounded alternate lane.
//! The consumer alternates between the lanes by configurable weights, so a
//! backlog of requests cannot starve responses and vice versa.

use crate::buffers::rate_limited::RateLimitedBuffer;
use crate::buffers::unbounded::UnboundedBuffer;
use crate::flowcontrol::RateLimiter;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Primary,
    Alternate,
}

struct Lanes<T> {
    primary: RateLimitedBuffer<T>,
    alternate: UnboundedBuffer<T>,
    alternator_index: u32,
}

/// A two-lane fair queue with predicate routing.
///
/// Inserting into the full primary lane waits for space; `try_insert` fails
/// fast instead. The alternate lane never refuses an item.
pub struct RoundRobinBuffer<T> {
    lanes: Mutex<Lanes<T>>,
    readable: Notify,
    writable: Notify,
    limiter: Arc<dyn RateLimiter>,
    route_alternate: Box<dyn Fn(&T) -> bool + Send + Sync>,
    primary_factor: u32,
    alternate_factor: u32,
    smaller_factor_doubled: u32,
}

impl<T> RoundRobinBuffer<T> {
    /// Create a fair queue with equal lane weights.
    pub fn new(
        capacity: usize,
        limiter: Arc<dyn RateLimiter>,
        route_alternate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::with_factors(capacity, limiter, route_alternate, 1, 1)
    }

    /// Create a fair queue serving `primary_factor` primary items for every
    /// `alternate_factor` alternate items.
    pub fn with_factors(
        capacity: usize,
        limiter: Arc<dyn RateLimiter>,
        route_alternate: impl Fn(&T) -> bool + Send + Sync + 'static,
        primary_factor: u32,
        alternate_factor: u32,
    ) -> Self {
        assert!(primary_factor > 0 && alternate_factor > 0);
        Self {
            lanes: Mutex::new(Lanes {
                primary: RateLimitedBuffer::new(capacity),
                alternate: UnboundedBuffer::new(),
                alternator_index: 1,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            limiter,
            route_alternate: Box::new(route_alternate),
            primary_factor,
            alternate_factor,
            smaller_factor_doubled: primary_factor.min(alternate_factor) * 2,
        }
    }

    /// Insert an item, waiting for space when the primary lane is full.
    pub async fn insert(&self, item: T) {
        if (self.route_alternate)(&item) {
            self.lock().alternate.insert(item);
            self.readable.notify_one();
            return;
        }

        let size = self.lock().primary.len();
        self.limiter.pre_insert(size).await;

        let mut item = item;
        loop {
            let writable = self.writable.notified();
            {
                let mut lanes = self.lock();
                match lanes.primary.try_insert(item) {
                    Ok(()) => {
                        let size = lanes.primary.len();
                        drop(lanes);
                        self.limiter.post_insert(size);
                        self.readable.notify_one();
                        return;
                    }
                    Err(rejected) => item = rejected,
                }
            }
            writable.await;
        }
    }

    /// Insert an item without waiting. Fails when the primary lane is full.
    pub fn try_insert(&self, item: T) -> Result<(), T> {
        if (self.route_alternate)(&item) {
            self.lock().alternate.insert(item);
            self.readable.notify_one();
            return Ok(());
        }
        self.lock().primary.try_insert(item)?;
        self.readable.notify_one();
        Ok(())
    }

    /// Remove the next item per the lane weights, waiting when both lanes
    /// are empty.
    pub async fn poll(&self) -> T {
        loop {
            let readable = self.readable.notified();
            if let Some(item) = self.poll_now() {
                return item;
            }
            readable.await;
        }
    }

    /// Remove the next item per the lane weights, or None when empty.
    pub fn poll_now(&self) -> Option<T> {
        let mut lanes = self.lock();
        let lane = self.select_lane(&lanes);
        let item = match lane {
            Lane::Primary => lanes.primary.poll(),
            Lane::Alternate => lanes.alternate.poll(),
        };
        if item.is_some() {
            lanes.alternator_index += 1;
            if lanes.alternator_index > self.primary_factor + self.alternate_factor {
                lanes.alternator_index = 1;
            }
            self.writable.notify_waiters();
        }
        item
    }

    /// Empty both lanes and wake blocked producers.
    pub fn drain(&self) -> Vec<T> {
        let mut lanes = self.lock();
        let mut items = lanes.primary.drain();
        items.extend(lanes.alternate.drain());
        drop(lanes);
        self.writable.notify_waiters();
        items
    }

    /// Current size of the primary lane.
    pub fn primary_len(&self) -> usize {
        self.lock().primary.len()
    }

    /// Whether both lanes are empty.
    pub fn is_empty(&self) -> bool {
        let lanes = self.lock();
        lanes.primary.is_empty() && lanes.alternate.is_empty()
    }

    /// Capacity of the primary lane.
    pub fn capacity(&self) -> usize {
        self.lock().primary.capacity()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lanes<T>> {
        // The lanes are plain queues; nothing can poison this lock.
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Weighted alternation: within the doubled smaller factor the lanes
    /// strictly interleave, then the heavier lane takes the remaining turns.
    /// An empty lane forfeits its turn to the other.
    fn select_lane(&self, lanes: &Lanes<T>) -> Lane {
        let index = lanes.alternator_index;
        let preferred = if index <= self.smaller_factor_doubled {
            if index % 2 == 0 {
                Lane::Alternate
            } else {
                Lane::Primary
            }
        } else if self.primary_factor > self.alternate_factor {
            Lane::Primary
        } else {
            Lane::Alternate
        };
        match preferred {
            Lane::Primary if lanes.primary.is_empty() => Lane::Alternate,
            Lane::Alternate if lanes.alternate.is_empty() => Lane::Primary,
            lane => lane,
        }
    }
}
