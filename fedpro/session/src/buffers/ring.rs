//! Fixed-capacity ring with retained history.
//!
//! Read items stay in the buffer until overwritten, which is what makes
//! replay after a connection drop possible. On overflow the oldest retained
//! item is silently dropped, read or not.

use std::collections::VecDeque;

/// A bounded buffer that keeps read items around for rewinding.
///
/// Items are ordered oldest to newest. A cursor separates the already-read
/// prefix from the unread tail; `poll` moves the cursor forward without
/// discarding anything, and `rewind_to` moves it back.
#[derive(Debug)]
pub struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
    /// Number of unread items at the back of `items`.
    unread: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty ring with the given capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
            unread: 0,
        }
    }

    /// Append an item, evicting the oldest retained item when full.
    pub fn insert(&mut self, item: T) {
        if self.items.len() == self.capacity {
            if self.unread == self.items.len() {
                // The evicted item was never read.
                self.unread -= 1;
            }
            self.items.pop_front();
        }
        self.items.push_back(item);
        self.unread += 1;
    }

    /// The next unread item, without moving the cursor.
    pub fn peek(&self) -> Option<&T> {
        if self.unread == 0 {
            return None;
        }
        self.items.get(self.items.len() - self.unread)
    }

    /// Read the next unread item. The item stays retained for rewinding.
    pub fn poll(&mut self) -> Option<T> {
        if self.unread == 0 {
            return None;
        }
        let item = self.items[self.items.len() - self.unread].clone();
        self.unread -= 1;
        Some(item)
    }

    /// Oldest retained item, read or not.
    pub fn peek_oldest(&self) -> Option<&T> {
        self.items.front()
    }

    /// Newest retained item, read or not.
    pub fn peek_newest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Move the cursor back so that the oldest retained item matching
    /// `pred` becomes the next unread item. Returns false (cursor untouched)
    /// when nothing in the already-read prefix matches.
    pub fn rewind_to<F>(&mut self, pred: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let read_prefix = self.items.len() - self.unread;
        for index in 0..read_prefix {
            if pred(&self.items[index]) {
                self.unread = self.items.len() - index;
                return true;
            }
        }
        false
    }

    /// Mark every retained item unread again.
    pub fn rewind_to_first(&mut self) {
        self.unread = self.items.len();
    }

    /// Number of unread items.
    pub fn len(&self) -> usize {
        self.unread
    }

    /// Whether there are no unread items.
    pub fn is_empty(&self) -> bool {
        self.unread == 0
    }

    /// Number of retained items, read or not.
    pub fn retained(&self) -> usize {
        self.items.len()
    }

    /// Maximum number of retained items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_in_insertion_order() {
        let mut ring = RingBuffer::new(4);
        ring.insert(1);
        ring.insert(2);
        ring.insert(3);
        assert_eq!(ring.poll(), Some(1));
        assert_eq!(ring.poll(), Some(2));
        assert_eq!(ring.peek(), Some(&3));
        assert_eq!(ring.poll(), Some(3));
        assert_eq!(ring.poll(), None);
        // Read items are still retained.
        assert_eq!(ring.retained(), 3);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=5 {
            ring.insert(i);
        }
        assert_eq!(ring.peek_oldest(), Some(&3));
        assert_eq!(ring.peek_newest(), Some(&5));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.poll(), Some(3));
    }

    #[test]
    fn overflow_adjusts_cursor_over_read_items() {
        let mut ring = RingBuffer::new(3);
        ring.insert(1);
        ring.insert(2);
        assert_eq!(ring.poll(), Some(1));
        // Evicts 1 (already read); unread tail must stay [2.., new].
        ring.insert(3);
        ring.insert(4);
        assert_eq!(ring.poll(), Some(2));
        assert_eq!(ring.poll(), Some(3));
        assert_eq!(ring.poll(), Some(4));
    }

    #[test]
    fn rewind_to_replays_read_items() {
        let mut ring = RingBuffer::new(8);
        for i in 1..=5 {
            ring.insert(i);
        }
        for _ in 0..5 {
            ring.poll();
        }
        assert!(ring.is_empty());

        assert!(ring.rewind_to(|&v| v == 3));
        assert_eq!(ring.poll(), Some(3));
        assert_eq!(ring.poll(), Some(4));
        assert_eq!(ring.poll(), Some(5));
        assert_eq!(ring.poll(), None);
    }

    #[test]
    fn rewind_to_missing_item_is_a_noop() {
        let mut ring = RingBuffer::new(4);
        ring.insert(1);
        ring.insert(2);
        ring.poll();
        assert!(!ring.rewind_to(|&v| v == 9));
        assert_eq!(ring.poll(), Some(2));
    }

    #[test]
    fn rewind_to_first_replays_everything_retained() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=4 {
            ring.insert(i);
        }
        for _ in 0..3 {
            ring.poll();
        }
        ring.rewind_to_first();
        assert_eq!(ring.poll(), Some(2));
        assert_eq!(ring.len(), 2);
    }
}
