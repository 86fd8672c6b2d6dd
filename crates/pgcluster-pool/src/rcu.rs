//! Read-copy-update cell.
//!
//! Writers build a complete new value and swap it in with one atomic pointer
//! store. Readers load the pointer once and keep using that generation for
//! as long as they hold it; they never wait for writers or for each other.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// A value published by atomic pointer swap.
pub struct Variable<T> {
    current: ArcSwap<T>,
}

impl<T> Variable<T> {
    /// Publish an initial value.
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
        }
    }

    /// The current generation.
    pub fn read(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Replace the value for all subsequent readers.
    pub fn assign(&self, value: T) {
        self.current.store(Arc::new(value));
    }

    /// Replace the value, returning the generation it replaced.
    pub fn exchange(&self, value: T) -> Arc<T> {
        self.current.swap(Arc::new(value))
    }
}

impl<T: Clone> Variable<T> {
    /// A private copy of the current value.
    pub fn read_copy(&self) -> T {
        T::clone(&self.current.load())
    }
}

impl<T: Default> Default for Variable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Variable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Variable").field(&*self.current.load()).finish()
    }
}
