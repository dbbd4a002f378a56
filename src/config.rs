use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Result, SplitErr, data::BlobSpec};

/// Learning rates of the two trainable segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningRates {
    pub center_back: f32,
    pub back: f32,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            center_back: 1e-3,
            back: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizes {
    pub train: usize,
    pub test: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            train: 16,
            test: 32,
        }
    }
}

/// The synthetic dataset every participant draws its shard from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub name: String,
    pub x_size: usize,
    pub classes: usize,
    pub train: usize,
    pub test: usize,
    pub eval: usize,
    pub spread: f32,
    pub noise: f32,
}

impl Default for DataConfig {
    fn default() -> Self {
        let blobs = BlobSpec::default();

        Self {
            name: "blobs".into(),
            x_size: blobs.x_size,
            classes: blobs.classes,
            train: blobs.train,
            test: blobs.test,
            eval: blobs.eval,
            spread: blobs.spread,
            noise: blobs.noise,
        }
    }
}

impl DataConfig {
    pub fn blob_spec(&self, seed: u64) -> BlobSpec {
        BlobSpec {
            x_size: self.x_size,
            classes: self.classes,
            train: self.train,
            test: self.test,
            eval: self.eval,
            spread: self.spread,
            noise: self.noise,
            seed,
        }
    }
}

/// When to run the held-out evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalSchedule {
    Never,
    #[default]
    Final,
    EveryEpoch,
}

/// Everything a run needs to know, read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub epochs: usize,
    /// Repopulate the caches every this many epochs, `0` populates them once.
    pub refresh_rate: usize,
    /// How many passes over the training data a window caches.
    pub refresh_factor: usize,
    /// The epoch personalization starts at, if any.
    pub personalization_epoch: Option<usize>,
    /// Restore the best-scoring `center_back` and `back` before personalizing.
    pub restore_best: bool,
    /// Keep fusing `back` segments while personalizing.
    pub merge_back_while_personalizing: bool,
    pub participants: usize,
    /// Train a single participant on all the data, without fusion.
    pub pooling: bool,
    /// Consume cached `center_front` outputs instead of running every segment every step.
    pub use_cache: bool,
    pub learning_rate: LearningRates,
    pub weight_decay: f32,
    pub batch_size: BatchSizes,
    pub seed: u64,
    /// The registered segment configuration to build.
    pub segments: String,
    pub split: usize,
    pub data: DataConfig,
    pub checkpoint_dir: Option<PathBuf>,
    /// Load every segment from `checkpoint_dir` before training.
    pub load_checkpoints: bool,
    pub evaluate: EvalSchedule,
    /// Also write every metric event as JSON lines into this file.
    pub metrics_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            refresh_rate: 0,
            refresh_factor: 1,
            personalization_epoch: None,
            restore_best: false,
            merge_back_while_personalizing: true,
            participants: 3,
            pooling: false,
            use_cache: true,
            learning_rate: LearningRates::default(),
            weight_decay: 3e-2,
            batch_size: BatchSizes::default(),
            seed: 42,
            segments: "mlp_split1".into(),
            split: 1,
            data: DataConfig::default(),
            checkpoint_dir: None,
            load_checkpoints: false,
            evaluate: EvalSchedule::default(),
            metrics_file: None,
        }
    }
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// The amount of participants actually created.
    pub fn participant_count(&self) -> usize {
        if self.pooling { 1 } else { self.participants }
    }

    /// Checks the config before anything gets built.
    pub fn validate(&self) -> Result<()> {
        if !self.pooling && self.participants == 0 {
            return invalid("at least one participant is needed");
        }

        if self.refresh_factor == 0 {
            return invalid("refresh_factor must be at least 1");
        }

        if self.batch_size.train == 0 || self.batch_size.test == 0 {
            return invalid("batch sizes must be at least 1");
        }

        for (name, lr) in [
            ("center_back", self.learning_rate.center_back),
            ("back", self.learning_rate.back),
        ] {
            if !lr.is_finite() || lr <= 0. {
                return invalid(&format!("learning rate of {name} must be positive, got {lr}"));
            }
        }

        if !self.weight_decay.is_finite() || self.weight_decay < 0. {
            return invalid("weight_decay must be non-negative");
        }

        if self.segments.is_empty() {
            return invalid("a segment configuration name is needed");
        }

        if self.data.name.is_empty() || self.data.x_size == 0 || self.data.classes < 2 {
            return invalid("data needs a name, features and at least two classes");
        }

        if self.load_checkpoints && self.checkpoint_dir.is_none() {
            return invalid("load_checkpoints needs a checkpoint_dir");
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(SplitErr::InvalidConfig(msg.to_string()))
}
