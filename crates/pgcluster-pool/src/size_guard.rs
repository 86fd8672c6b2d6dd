//! Scoped counter increments.
//!
//! A [`SizeGuard`] adds one to a shared counter when created and subtracts
//! one when dropped. Every path that ends a guard's life, including task
//! cancellation and panics, therefore releases it exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Holds one unit of a shared counter for as long as it lives.
pub struct SizeGuard {
    counter: Arc<AtomicUsize>,
    value: usize,
}

impl SizeGuard {
    /// Increment `counter` unconditionally.
    #[must_use]
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        let value = counter.fetch_add(1, Ordering::AcqRel) + 1;
        Self { counter, value }
    }

    /// Increment `counter` only if it is below `limit`.
    ///
    /// The check and the increment are a single atomic step, so concurrent
    /// callers can never push the counter past `limit`.
    #[must_use]
    pub fn try_new(counter: Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return None;
            }
            match counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Self {
                        counter,
                        value: current + 1,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Counter value right after this guard incremented it.
    #[must_use]
    pub fn value(&self) -> usize {
        self.value
    }
}

impl Drop for SizeGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for SizeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeGuard")
            .field("value", &self.value)
            .field("current", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}
