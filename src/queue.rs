//! # Bounded FIFO
//!
//! Fixed-capacity ring buffer of task-slot ids. All four kernel queues
//! (run, delay, real-time, aperiodic) are instances of this type, sized
//! to `MAX_TASKS`. Entries are opaque to the queue; it never interprets
//! them.
//!
//! The storage is a single heap allocation made at creation time and
//! never resized. Enqueue and dequeue are O(1). Dropping the queue
//! releases the storage.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::errors::KernelError;

/// Bounded circular buffer of `usize` entries.
pub struct Queue {
    buf: Box<[usize]>,
    head: usize,
    len: usize,
}

impl Queue {
    /// Create a queue holding at most `cap` entries.
    ///
    /// Fails with `OutOfMemory` when the allocator cannot provide the
    /// storage; the kernel treats that as a boot-time error, not a
    /// panic.
    pub fn new(cap: usize) -> Result<Self, KernelError> {
        let mut v = Vec::new();
        v.try_reserve_exact(cap)
            .map_err(|_| KernelError::OutOfMemory)?;
        v.resize(cap, 0);
        Ok(Self {
            buf: v.into_boxed_slice(),
            head: 0,
            len: 0,
        })
    }

    /// Number of entries currently queued.
    #[inline]
    pub fn count(&self) -> usize {
        self.len
    }

    /// Whether the queue has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `v` at the tail.
    pub fn add_tail(&mut self, v: usize) -> Result<(), KernelError> {
        if self.len == self.buf.len() {
            return Err(KernelError::QueueFull);
        }
        let tail = (self.head + self.len) % self.buf.len();
        self.buf[tail] = v;
        self.len += 1;
        Ok(())
    }

    /// Insert `v` in front of the current head. The next `remove`
    /// returns it first.
    pub fn add_head(&mut self, v: usize) -> Result<(), KernelError> {
        if self.len == self.buf.len() {
            return Err(KernelError::QueueFull);
        }
        self.head = (self.head + self.buf.len() - 1) % self.buf.len();
        self.buf[self.head] = v;
        self.len += 1;
        Ok(())
    }

    /// Dequeue from the head, or `None` when empty.
    pub fn remove(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let v = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        Some(v)
    }

    /// Read the head without removing it.
    pub fn peek(&self) -> Option<usize> {
        if self.len == 0 {
            None
        } else {
            Some(self.buf[self.head])
        }
    }

    /// Read the entry `idx` positions behind the head.
    pub fn get(&self, idx: usize) -> Option<usize> {
        if idx >= self.len {
            return None;
        }
        Some(self.buf[(self.head + idx) % self.buf.len()])
    }

    /// Move the head entry to the tail. No-op on fewer than two
    /// entries.
    pub fn rotate(&mut self) {
        if self.len > 1 {
            let v = self.buf[self.head];
            self.head = (self.head + 1) % self.buf.len();
            let tail = (self.head + self.len - 1) % self.buf.len();
            self.buf[tail] = v;
        }
    }

    /// Remove every occurrence of `v`, preserving the order of the
    /// remaining entries. Returns whether anything was removed.
    pub fn purge(&mut self, v: usize) -> bool {
        let n = self.len;
        let mut removed = false;
        for _ in 0..n {
            match self.remove() {
                Some(x) if x == v => removed = true,
                Some(x) => {
                    // Re-adding below capacity cannot fail.
                    let _ = self.add_tail(x);
                }
                None => break,
            }
        }
        removed
    }

    /// Whether `v` is currently queued.
    pub fn contains(&self, v: usize) -> bool {
        (0..self.len).any(|i| self.get(i) == Some(v))
    }
}
