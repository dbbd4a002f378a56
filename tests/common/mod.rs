#![allow(dead_code)]

use machine_learning::{ParamState, dataset::Dataset};
use ndarray::ArrayD;
use split_learning::{
    Orchestrator, Result,
    config::RunConfig,
    data::{DatasetProvider, Shard},
    registry::SegmentRegistry,
    sink::MemorySink,
};

pub const X_SIZE: usize = 2;
pub const CLASSES: usize = 3;

/// Hands participant `i` exactly `train[i]` training samples.
pub struct FixedShards {
    pub train: Vec<usize>,
    pub test: usize,
    pub eval: usize,
    /// A participant whose first training sample has a NaN target.
    pub poisoned: Option<usize>,
}

impl FixedShards {
    pub fn new(train: &[usize]) -> Self {
        Self {
            train: train.to_vec(),
            test: 6,
            eval: 6,
            poisoned: None,
        }
    }
}

fn samples(n: usize, offset: usize) -> Dataset {
    let mut data = Vec::with_capacity(n * (X_SIZE + CLASSES));

    for i in 0..n {
        let class = (i + offset) % CLASSES;
        data.extend([class as f32, 1. - class as f32 * 0.5]);
        data.extend((0..CLASSES).map(|c| if c == class { 1. } else { 0. }));
    }

    Dataset::new(data, X_SIZE, CLASSES).unwrap()
}

fn poison_first(ds: Dataset) -> Dataset {
    let mut data = Vec::with_capacity(ds.len() * (X_SIZE + CLASSES));

    for i in 0..ds.len() {
        let (x, y) = ds.row(i).unwrap();
        data.extend_from_slice(x);

        if i == 0 {
            data.extend(y.iter().map(|_| f32::NAN));
        } else {
            data.extend_from_slice(y);
        }
    }

    Dataset::new(data, X_SIZE, CLASSES).unwrap()
}

impl DatasetProvider for FixedShards {
    fn x_size(&self) -> usize {
        X_SIZE
    }

    fn classes(&self) -> usize {
        CLASSES
    }

    fn shard(&self, index: usize, _participants: usize) -> Result<Shard> {
        let train = if self.poisoned == Some(index) {
            poison_first(samples(self.train[index], index))
        } else {
            samples(self.train[index], index)
        };

        Ok(Shard {
            train,
            test: samples(self.test, index + 1),
            eval: samples(self.eval, index + 2),
        })
    }

    fn pooled(&self) -> Result<Shard> {
        Ok(Shard {
            train: samples(self.train.iter().sum(), 0),
            test: samples(self.test, 1),
            eval: samples(self.eval, 2),
        })
    }
}

pub fn config(participants: usize) -> RunConfig {
    RunConfig {
        epochs: 3,
        participants,
        batch_size: split_learning::config::BatchSizes { train: 4, test: 4 },
        ..RunConfig::default()
    }
}

pub fn orchestrator(config: RunConfig, provider: &FixedShards) -> (Orchestrator, MemorySink) {
    let sink = MemorySink::new();
    let orchestrator = Orchestrator::setup(
        config,
        provider,
        &SegmentRegistry::new(),
        Box::new(sink.clone()),
    )
    .unwrap();

    (orchestrator, sink)
}

/// `state` with every value replaced by `value`.
pub fn filled(state: &ParamState, value: f32) -> ParamState {
    state
        .iter()
        .map(|(name, t)| (name.clone(), ArrayD::from_elem(t.raw_dim(), value)))
        .collect()
}

/// Every value of `state` is `expected`, up to rounding.
pub fn all_close(state: &ParamState, expected: f32) -> bool {
    state
        .iter()
        .all(|(_, t)| t.iter().all(|v| (v - expected).abs() < 1e-5))
}
