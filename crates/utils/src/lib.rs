#![cfg_attr(not(any(test, feature = "std")), no_std)]

// Lock API for the whole workspace. Anything reachable from an exception
// handler must use these (or their `try_lock`), never a sleeping lock.
pub use spin::Once;
pub use spin::{Mutex, MutexGuard};

/// Fixed-capacity FIFO with no allocation.
pub struct RingBuffer<T: Copy, const N: usize> {
    buffer: [T; N],
    head: usize,
    tail: usize,
    full: bool,
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    #[must_use]
    pub const fn new(default_val: T) -> Self {
        Self {
            buffer: [default_val; N],
            head: 0,
            tail: 0,
            full: false,
        }
    }

    /// Appends `item`; returns false and leaves the buffer untouched when full.
    pub fn push(&mut self, item: T) -> bool {
        if self.full {
            return false;
        }
        self.store(item);
        true
    }

    /// Appends `item`, evicting the oldest element when full.
    /// Returns the evicted element, if any.
    pub fn push_overwrite(&mut self, item: T) -> Option<T> {
        let evicted = if self.full { self.pop() } else { None };
        self.store(item);
        evicted
    }

    fn store(&mut self, item: T) {
        self.buffer[self.head] = item;
        self.head = (self.head + 1) % N;
        self.full = self.head == self.tail;
    }

    /// Removes the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.buffer[self.tail];
        self.tail = (self.tail + 1) % N;
        self.full = false;
        Some(item)
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    pub fn len(&self) -> usize {
        if self.full {
            N
        } else {
            (self.head + N - self.tail) % N
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.full = false;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
