//! Fixed-capacity ring buffer
//!
//! O(1) append; once full, every push drops the oldest element.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, returning the evicted one if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Append many items, returning how many old items were dropped
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) -> usize {
        items
            .into_iter()
            .filter_map(|item| self.push(item))
            .count()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut ring = RingBuffer::new(3);
        assert!(ring.push(1).is_none());
        assert!(ring.push(2).is_none());
        assert_eq!(ring.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=3 {
            ring.push(i);
        }
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.to_vec(), vec![2, 3, 4]);
        assert_eq!(ring.iter().next_back(), Some(&4));
    }

    #[test]
    fn test_extend_counts_dropped() {
        let mut ring = RingBuffer::new(4);
        let dropped = ring.extend(0..10);
        assert_eq!(dropped, 6);
        assert_eq!(ring.to_vec(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.to_vec(), vec!["b"]);
    }
}
