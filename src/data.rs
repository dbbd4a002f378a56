use std::ops::Range;

use machine_learning::dataset::Dataset;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use crate::{Result, SplitErr};

/// The private data of a single participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub train: Dataset,
    pub test: Dataset,
    pub eval: Dataset,
}

/// Hands every participant its shard of the data.
pub trait DatasetProvider {
    /// The amount of input features per sample.
    fn x_size(&self) -> usize;

    /// The amount of classes, labels are one-hot rows of this width.
    fn classes(&self) -> usize;

    /// The shard of participant `index` out of `participants`.
    fn shard(&self, index: usize, participants: usize) -> Result<Shard>;

    /// All the data as a single shard, used when pooling.
    fn pooled(&self) -> Result<Shard>;
}

/// Splits `total` samples among `parts` and returns the range of part `index`.
///
/// Ranges are contiguous, disjoint and cover `[0..total)`, their sizes differ by at most 1.
pub fn shard_range(total: usize, index: usize, parts: usize) -> Result<Range<usize>> {
    if parts == 0 || index >= parts {
        return Err(SplitErr::InvalidConfig(format!(
            "shard {index} out of {parts} parts"
        )));
    }

    let base = total / parts;
    let rem = total % parts;

    let start = index * base + index.min(rem);
    let extra = if index < rem { 1 } else { 0 };

    Ok(start..start + base + extra)
}

/// A seeded classification problem made of gaussian clusters, one per class.
#[derive(Debug, Clone)]
pub struct SyntheticBlobs {
    train: Dataset,
    test: Dataset,
    eval: Dataset,
    x_size: usize,
    classes: usize,
}

/// The knobs of `SyntheticBlobs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobSpec {
    pub x_size: usize,
    pub classes: usize,
    pub train: usize,
    pub test: usize,
    pub eval: usize,
    /// Standard deviation of the cluster centers around the origin.
    pub spread: f32,
    /// Standard deviation of the samples around their center.
    pub noise: f32,
    pub seed: u64,
}

impl Default for BlobSpec {
    fn default() -> Self {
        Self {
            x_size: 8,
            classes: 3,
            train: 600,
            test: 150,
            eval: 150,
            spread: 3.0,
            noise: 1.0,
            seed: 42,
        }
    }
}

impl SyntheticBlobs {
    /// Generates the train, test and evaluation sets.
    ///
    /// # Returns
    /// An error if `spec` has no features, no classes or an invalid deviation.
    pub fn new(spec: BlobSpec) -> Result<Self> {
        if spec.x_size == 0 || spec.classes == 0 {
            return Err(SplitErr::InvalidConfig(
                "blobs need at least one feature and one class".into(),
            ));
        }

        for (name, dev) in [("spread", spec.spread), ("noise", spec.noise)] {
            if !dev.is_finite() || dev < 0. {
                return Err(SplitErr::InvalidConfig(format!(
                    "blob {name} must be a finite non-negative deviation, got {dev}"
                )));
            }
        }

        let invalid = |e: rand_distr::NormalError| SplitErr::InvalidConfig(e.to_string());
        let centers_dist = Normal::new(0., spec.spread).map_err(invalid)?;
        let noise = Normal::new(0., spec.noise).map_err(invalid)?;

        let mut rng = StdRng::seed_from_u64(spec.seed);
        let centers: Vec<Vec<f32>> = (0..spec.classes)
            .map(|_| {
                (0..spec.x_size)
                    .map(|_| centers_dist.sample(&mut rng))
                    .collect()
            })
            .collect();

        let mut sample = |n| Self::sample(&mut rng, &centers, &noise, n, spec.classes);

        Ok(Self {
            train: sample(spec.train)?,
            test: sample(spec.test)?,
            eval: sample(spec.eval)?,
            x_size: spec.x_size,
            classes: spec.classes,
        })
    }

    fn sample(
        rng: &mut StdRng,
        centers: &[Vec<f32>],
        noise: &Normal<f32>,
        n: usize,
        classes: usize,
    ) -> Result<Dataset> {
        let x_size = centers.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n * (x_size + classes));

        for _ in 0..n {
            let class = rng.random_range(0..classes);
            data.extend(centers[class].iter().map(|c| c + noise.sample(&mut *rng)));
            data.extend((0..classes).map(|c| if c == class { 1. } else { 0. }));
        }

        Ok(Dataset::new(data, x_size, classes)?)
    }
}

impl DatasetProvider for SyntheticBlobs {
    fn x_size(&self) -> usize {
        self.x_size
    }

    fn classes(&self) -> usize {
        self.classes
    }

    fn shard(&self, index: usize, participants: usize) -> Result<Shard> {
        let part = |ds: &Dataset| -> Result<Dataset> {
            Ok(ds.slice(shard_range(ds.len(), index, participants)?))
        };

        Ok(Shard {
            train: part(&self.train)?,
            test: part(&self.test)?,
            eval: part(&self.eval)?,
        })
    }

    fn pooled(&self) -> Result<Shard> {
        Ok(Shard {
            train: self.train.clone(),
            test: self.test.clone(),
            eval: self.eval.clone(),
        })
    }
}
