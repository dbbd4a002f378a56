use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1};

use crate::{Result, SplitErr};

/// How many times a cache was written, read and cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub puts: usize,
    pub gets: usize,
    pub clears: usize,
}

/// A key-value store of per-sample rows, valid for a single refresh window.
///
/// Both the server's activation caches and its target caches are instances of this type, each
/// row being either `center_front(front(x))` or the sample's one-hot label.
#[derive(Debug, Default)]
pub struct ActivationCache {
    rows: HashMap<u64, Array1<f32>>,
    stats: CacheStats,
}

impl ActivationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, overwriting whatever was there.
    pub fn put(&mut self, key: u64, value: ArrayView1<f32>) {
        self.stats.puts += 1;
        self.rows.insert(key, value.to_owned());
    }

    /// Stores every row of `values`, the `i`-th one under `keys[i]`.
    pub fn put_rows(&mut self, keys: &[u64], values: &Array2<f32>) -> Result<()> {
        if keys.len() != values.nrows() {
            return Err(SplitErr::ShapeMismatch {
                name: "cached rows".into(),
                got: vec![values.nrows()],
                expected: vec![keys.len()],
            });
        }

        for (&key, row) in keys.iter().zip(values.rows()) {
            self.put(key, row);
        }

        Ok(())
    }

    /// Reads the row stored under `key`.
    ///
    /// # Returns
    /// `KeyNotFound` if the key wasn't populated in the current window.
    pub fn get(&mut self, key: u64) -> Result<ArrayView1<'_, f32>> {
        self.stats.gets += 1;
        self.rows
            .get(&key)
            .map(|row| row.view())
            .ok_or(SplitErr::KeyNotFound { key })
    }

    /// Stacks the rows of the given keys into a batch, in the order of `keys`.
    pub fn gather(&mut self, keys: &[u64]) -> Result<Array2<f32>> {
        let Some(&first) = keys.first() else {
            return Err(SplitErr::EmptyInput);
        };

        let width = self.get(first)?.len();
        let mut batch = Array2::zeros((keys.len(), width));

        for (mut dst, &key) in batch.rows_mut().into_iter().zip(keys) {
            let row = self.get(key)?;

            if row.len() != width {
                return Err(SplitErr::ShapeMismatch {
                    name: format!("cached row {key}"),
                    got: vec![row.len()],
                    expected: vec![width],
                });
            }

            dst.assign(&row);
        }

        // The first key was read twice.
        self.stats.gets -= 1;
        Ok(batch)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.rows.contains_key(&key)
    }

    /// Drops every entry, releasing the memory held by the previous window.
    pub fn clear(&mut self) {
        self.stats.clears += 1;
        self.rows.clear();
        self.rows.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
