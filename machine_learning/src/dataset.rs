use std::ops::Range;

use ndarray::Array2;

use crate::{MlErr, Result};

/// An in-memory supervised dataset stored row by row: `x_size` features followed by
/// `y_size` target values per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    data: Vec<f32>,
    x_size: usize,
    y_size: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `data` - The samples, row-major.
    /// * `x_size` - The amount of features per sample.
    /// * `y_size` - The amount of target values per sample.
    ///
    /// # Returns
    /// An error if `data` isn't made of whole rows.
    pub fn new(data: Vec<f32>, x_size: usize, y_size: usize) -> Result<Self> {
        let row = x_size + y_size;

        if row == 0 || data.len() % row != 0 {
            return Err(MlErr::SizeMismatch {
                what: "dataset rows",
                got: data.len(),
                expected: row,
            });
        }

        Ok(Self {
            data,
            x_size,
            y_size,
        })
    }

    /// Creates a dataset with no samples.
    pub fn empty(x_size: usize, y_size: usize) -> Self {
        Self {
            data: Vec::new(),
            x_size,
            y_size,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() / (self.x_size + self.y_size)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn x_size(&self) -> usize {
        self.x_size
    }

    pub fn y_size(&self) -> usize {
        self.y_size
    }

    /// Returns the features and targets of the `i`-th sample.
    pub fn row(&self, i: usize) -> Option<(&[f32], &[f32])> {
        let row = self.x_size + self.y_size;
        let raw = self.data.get(i * row..(i + 1) * row)?;
        Some(raw.split_at(self.x_size))
    }

    /// Gathers the given samples into an `(x, y)` batch.
    ///
    /// # Returns
    /// An error if any index is out of bounds.
    pub fn batch(&self, indices: &[usize]) -> Result<(Array2<f32>, Array2<f32>)> {
        let mut x = Array2::zeros((indices.len(), self.x_size));
        let mut y = Array2::zeros((indices.len(), self.y_size));

        for (r, &i) in indices.iter().enumerate() {
            let (xs, ys) = self.row(i).ok_or(MlErr::SizeMismatch {
                what: "dataset index",
                got: i,
                expected: self.len(),
            })?;

            x.row_mut(r).iter_mut().zip(xs).for_each(|(d, &s)| *d = s);
            y.row_mut(r).iter_mut().zip(ys).for_each(|(d, &s)| *d = s);
        }

        Ok((x, y))
    }

    /// Copies a contiguous range of samples into a new dataset.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let row = self.x_size + self.y_size;
        let end = range.end.min(self.len());
        let start = range.start.min(end);

        Self {
            data: self.data[start * row..end * row].to_vec(),
            x_size: self.x_size,
            y_size: self.y_size,
        }
    }

    /// Appends the samples of `other` to this dataset.
    pub fn extend(&mut self, other: &Dataset) -> Result<()> {
        if (other.x_size, other.y_size) != (self.x_size, self.y_size) {
            return Err(MlErr::SizeMismatch {
                what: "dataset row width",
                got: other.x_size + other.y_size,
                expected: self.x_size + self.y_size,
            });
        }

        self.data.extend_from_slice(&other.data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn dataset() -> Dataset {
        let data = vec![
            0.0, 1.0, 1.0, 0.0, //
            2.0, 3.0, 0.0, 1.0, //
            4.0, 5.0, 1.0, 0.0, //
        ];

        Dataset::new(data, 2, 2).unwrap()
    }

    #[test]
    fn partial_rows_are_rejected() {
        assert!(Dataset::new(vec![0.0; 5], 2, 1).is_err());
    }

    #[test]
    fn batch_gathers_rows_in_order() {
        let (x, y) = dataset().batch(&[2, 0]).unwrap();

        assert_eq!(x, array![[4.0, 5.0], [0.0, 1.0]]);
        assert_eq!(y, array![[1.0, 0.0], [1.0, 0.0]]);
        assert!(dataset().batch(&[3]).is_err());
    }

    #[test]
    fn slice_and_extend() {
        let ds = dataset();
        let mut head = ds.slice(0..1);
        let tail = ds.slice(1..10);

        assert_eq!(head.len(), 1);
        assert_eq!(tail.len(), 2);

        head.extend(&tail).unwrap();
        assert_eq!(head, ds);
    }
}
