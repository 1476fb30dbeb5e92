//! Ordinal-addressed, set-once result storage
//!
//! [`ResultCollector`] is a fixed-size sparse array with one slot per shard ordinal of
//! a request. Shard callbacks running on arbitrary threads write into their own slot
//! exactly once; the thread that observes the request's countdown reach zero reads the
//! whole array afterwards.
//!
//! Each slot is a [`OnceLock`], so writes are a single atomic publish with no lock and
//! no lost updates. A second write to the same slot fails with
//! [`ScrollError::DuplicateWrite`] instead of overwriting the first value.

use crate::error::ScrollError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Fixed-size set-once array indexed by shard ordinal
pub struct ResultCollector<T> {
    slots: Box<[OnceLock<T>]>,
    filled: AtomicUsize,
}

impl<T> ResultCollector<T> {
    /// Create a collector with `size` empty slots
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| OnceLock::new()).collect(),
            filled: AtomicUsize::new(0),
        }
    }

    /// Write `value` into slot `ordinal`
    ///
    /// # Errors
    /// - `DuplicateWrite` if the slot already holds a value; the stored value is kept
    /// - `InvalidInput` if `ordinal` is outside `0..size()`
    pub fn set_once(&self, ordinal: usize, value: T) -> Result<(), ScrollError> {
        let slot = self.slot(ordinal)?;
        slot.set(value).map_err(|_| ScrollError::duplicate_write(ordinal))?;
        self.filled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Get the value stored at `ordinal`, if any
    pub fn get(&self, ordinal: usize) -> Option<&T> {
        self.slots.get(ordinal).and_then(OnceLock::get)
    }

    /// Check whether slot `ordinal` has been written
    pub fn is_set(&self, ordinal: usize) -> bool {
        self.get(ordinal).is_some()
    }

    /// Number of slots
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots that hold a value
    pub fn filled_count(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    /// Iterate over filled slots in ascending ordinal order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(ordinal, slot)| slot.get().map(|value| (ordinal, value)))
    }

    /// Values of the filled slots in ascending ordinal order
    pub fn values(&self) -> Vec<&T> {
        self.iter().map(|(_, value)| value).collect()
    }

    /// Consume the collector, returning every slot in ordinal order
    pub fn into_slots(self) -> Vec<Option<T>> {
        self.slots.into_vec().into_iter().map(OnceLock::into_inner).collect()
    }

    fn slot(&self, ordinal: usize) -> Result<&OnceLock<T>, ScrollError> {
        self.slots.get(ordinal).ok_or_else(|| {
            ScrollError::invalid_input(
                "ordinal",
                format!("ordinal {} is out of range for {} slots", ordinal, self.slots.len()),
                "Use the position of the shard context within the request",
            )
        })
    }
}

impl<T> fmt::Debug for ResultCollector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCollector")
            .field("size", &self.size())
            .field("filled", &self.filled_count())
            .finish()
    }
}
