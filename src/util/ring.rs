//! Fixed-capacity FIFO used for packet batching.
//!
//! A ring built with capacity `N` holds at most `N - 1` items, the
//! classic one-empty-slot ring. `count() + free() == N` at all times.

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};

pub struct Ring<T> {
    rb: HeapRb<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    /// # Panics
    ///
    /// Panics if `capacity < 2`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        Self {
            rb: HeapRb::new(capacity - 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored items.
    pub fn count(&self) -> usize {
        self.rb.occupied_len()
    }

    /// `capacity - count`; one more than the number of items that still fit.
    pub fn free(&self) -> usize {
        self.capacity - self.count()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }

    /// Appends `item`, handing it back if the ring is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.rb.try_push(item)
    }

    /// Pushes items from `items` until the ring fills or the iterator ends.
    /// Items that do not fit stay in the iterator.
    pub fn push_n<I: Iterator<Item = T>>(&mut self, items: &mut I) -> usize {
        let mut pushed = 0;
        while !self.rb.is_full() {
            let Some(item) = items.next() else { break };
            if self.rb.try_push(item).is_err() {
                break;
            }
            pushed += 1;
        }
        pushed
    }

    pub fn pop(&mut self) -> Option<T> {
        self.rb.try_pop()
    }

    /// Moves up to `n` items, oldest first, onto the end of `out`.
    pub fn pop_n(&mut self, out: &mut Vec<T>, n: usize) -> usize {
        let take = n.min(self.count());
        out.reserve(take);
        for _ in 0..take {
            match self.rb.try_pop() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        take
    }

    /// Oldest item, without removing it.
    pub fn top(&self) -> Option<&T> {
        self.rb.try_peek()
    }

    /// Up to `n` items, oldest first, without removing them.
    pub fn top_n(&self, n: usize) -> impl Iterator<Item = &T> {
        self.rb.iter().take(n)
    }

    /// Discards up to `n` of the oldest items.
    pub fn remove_n(&mut self, n: usize) -> usize {
        let take = n.min(self.count());
        for _ in 0..take {
            drop(self.rb.try_pop());
        }
        take
    }

    /// Iterates the stored items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rb.iter()
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .finish()
    }
}
