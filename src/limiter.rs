//! Counting admission gate shared by every stage that fans out work.

use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::trace;

/// Bounds how many units of work run at once.
///
/// A capacity of zero is treated as one, so every configuration makes
/// progress.
#[derive(Debug)]
pub struct Limiter {
    capacity: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

/// A held slot. Dropping it gives the slot back.
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(default_parallelism())
    }
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until a slot is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut in_use = self.lock();
        while *in_use >= self.capacity {
            in_use = self
                .freed
                .wait(in_use)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *in_use += 1;
        trace!(in_use = *in_use, capacity = self.capacity, "Limiter slot acquired");
        Permit { limiter: self }
    }

    fn release(&self) {
        let mut in_use = self.lock();
        assert!(*in_use > 0, "limiter released more slots than were acquired");
        *in_use -= 1;
        drop(in_use);
        self.freed.notify_one();
    }
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
