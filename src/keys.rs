use crate::{Result, SplitErr};

/// Hands out the cache keys of a refresh window.
///
/// Keys are assigned in order and wrap around modulo the window's capacity, so the `i`-th
/// sample of a window always gets the key `i % capacity`. A window populated with `capacity`
/// samples can therefore be consumed for as many epochs as needed, revisiting the same keys
/// once the cursor wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCounter {
    capacity: u64,
    cursor: u64,
}

impl KeyCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity as u64,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Takes the keys for a batch of `n` samples.
    ///
    /// # Returns
    /// `KeyCollision` if the batch is larger than the window, as it would hold the same key
    /// more than once.
    pub fn take(&mut self, n: usize) -> Result<Vec<u64>> {
        if n as u64 > self.capacity {
            return Err(SplitErr::KeyCollision {
                requested: n,
                capacity: self.capacity as usize,
            });
        }

        let keys = (0..n as u64)
            .map(|i| (self.cursor + i) % self.capacity)
            .collect();

        if self.capacity > 0 {
            self.cursor = (self.cursor + n as u64) % self.capacity;
        }

        Ok(keys)
    }

    /// Rewinds to the first key of the window.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Changes the window's capacity and rewinds.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity as u64;
        self.cursor = 0;
    }
}
