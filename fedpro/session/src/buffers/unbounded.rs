//! Unbounded lane of the fair outgoing queue.
//!
//! Responses to remote traffic must never be refused: dropping them would
//! stall the other side, and their number is bounded by what the remote side
//! has in flight.

use std::collections::VecDeque;

/// An unbounded FIFO lane.
#[derive(Debug, Default)]
pub struct UnboundedBuffer<T> {
    items: VecDeque<T>,
}

impl<T> UnboundedBuffer<T> {
    /// Create an empty lane.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Insert at the back. Always succeeds.
    pub fn insert(&mut self, item: T) {
        self.items.push_back(item);
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

    /// Remove and return everything queued.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}
