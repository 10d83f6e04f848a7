//! Bounded lane of the fair outgoing queue.

use std::collections::VecDeque;

/// A bounded FIFO lane. Locking and producer back-pressure live in the
/// surrounding fair queue; this type only enforces the capacity.
#[derive(Debug)]
pub struct RateLimitedBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RateLimitedBuffer<T> {
    /// Create an empty lane with the given capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            items: VecDeque::new(),
        }
    }

    /// Insert at the back, or hand the item back when the lane is full.
    pub fn try_insert(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove the front item.
    pub fn poll(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// The front item.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the lane is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove and return everything queued.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lane_rejects_inserts() {
        let mut lane = RateLimitedBuffer::new(2);
        assert!(lane.try_insert(1).is_ok());
        assert!(lane.try_insert(2).is_ok());
        assert_eq!(lane.try_insert(3), Err(3));
        assert_eq!(lane.poll(), Some(1));
        assert!(lane.try_insert(3).is_ok());
    }
}
