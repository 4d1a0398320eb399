//! Fixed-size batch accumulator for bulk writes.

use std::collections::HashSet;

/// Accumulates items until `max_size` is reached.
///
/// Items pushed with [`BatchAccumulator::push_unique`] are deduplicated
/// within the current batch: the first item for a key wins and later ones
/// are rejected. Flushing clears the keys along with the items.
pub struct BatchAccumulator<T> {
    buffer: Vec<T>,
    keys: HashSet<String>,
    max_size: usize,
}

impl<T> BatchAccumulator<T> {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Vec::with_capacity(max_size),
            keys: HashSet::new(),
            max_size,
        }
    }

    pub fn push(&mut self, item: T) {
        self.buffer.push(item);
    }

    /// Returns false (and drops `item`) when `key` is already in this batch.
    pub fn push_unique(&mut self, key: &str, item: T) -> bool {
        if !self.keys.insert(key.to_string()) {
            return false;
        }
        self.buffer.push(item);
        true
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.max_size
    }

    /// Take every buffered item and reset for the next batch.
    pub fn flush(&mut self) -> Vec<T> {
        self.keys.clear();
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_size))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
