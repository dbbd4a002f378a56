use log::info;
use machine_learning::{MlErr, ParamState, Segment, optimization::Optimizer};
use ndarray::{Array2, ArrayView2};

use crate::{
    Result, SplitErr,
    cache::{ActivationCache, CacheStats},
    mode::{ExecMode, Mode},
    participant::FrontOutput,
};

/// What `center_back` runs on: rows cached under the given keys or a fresh activation.
#[derive(Debug, Clone, PartialEq)]
pub enum CenterInput {
    Keys(Vec<u64>),
    Activation(Array2<f32>),
}

/// The activation and target caches of one mode.
#[derive(Debug, Default)]
struct Caches {
    activations: ActivationCache,
    targets: ActivationCache,
}

/// The server side of one participant: a frozen `center_front` segment and a trainable
/// `center_back` one, plus the caches of `center_front`'s outputs.
pub struct ServerCounterpart {
    id: String,
    center_front: Segment,
    center_back: Segment,
    optimizer: Box<dyn Optimizer>,
    train: Caches,
    test: Caches,
    frozen_at: Option<usize>,
}

impl ServerCounterpart {
    /// Creates a new `ServerCounterpart`.
    ///
    /// # Arguments
    /// * `id` - The id of the participant this counterpart serves.
    /// * `center_front` - The frozen segment whose outputs get cached.
    /// * `center_back` - The trainable segment, trained with `optimizer`.
    /// * `optimizer` - The optimizer of `center_back`.
    pub fn new(
        id: impl Into<String>,
        center_front: Segment,
        center_back: Segment,
        optimizer: Box<dyn Optimizer>,
    ) -> Self {
        Self {
            id: id.into(),
            center_front: center_front.frozen(),
            center_back,
            optimizer,
            train: Caches::default(),
            test: Caches::default(),
            frozen_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs `center_front` on the front segment's output.
    ///
    /// When populating, every row and target is stored under its sample key; in direct
    /// execution the activation is simply returned. Cached execution never reaches this
    /// segment and is rejected.
    pub fn forward_center_front(
        &mut self,
        front: &FrontOutput,
        mode: Mode,
        exec: ExecMode,
    ) -> Result<Array2<f32>> {
        if exec == ExecMode::Cached {
            return Err(SplitErr::ModeViolation {
                participant: self.id.clone(),
                op: "forward_center_front",
                mode: exec,
            });
        }

        let activation = self.center_front.forward(front.activation.view())?;

        if exec == ExecMode::Populate {
            let caches = self.caches_mut(mode);
            caches.activations.put_rows(&front.keys, &activation)?;
            caches.targets.put_rows(&front.keys, &front.targets)?;
        }

        Ok(activation)
    }

    /// Runs `center_back`.
    ///
    /// The input is treated as a leaf: gradients computed by `backward_center` stop at
    /// `center_back` and never reach `center_front`.
    pub fn forward_center_back(&mut self, input: CenterInput, mode: Mode) -> Result<Array2<f32>> {
        let x = match input {
            CenterInput::Keys(keys) => self.caches_mut(mode).activations.gather(&keys)?,
            CenterInput::Activation(x) => x,
        };

        self.run_center_back(x.view())
    }

    /// The cached targets of the given keys.
    pub fn targets(&mut self, keys: &[u64], mode: Mode) -> Result<Array2<f32>> {
        self.caches_mut(mode).targets.gather(keys)
    }

    /// Accumulates `center_back`'s gradient, a no-op once frozen.
    pub fn backward_center(&mut self, grad: Array2<f32>) -> Result<()> {
        if self.is_frozen() {
            return Ok(());
        }

        self.center_back.backward(grad)?;
        Ok(())
    }

    /// Applies one optimizer step to `center_back`, a no-op once frozen.
    pub fn step_center(&mut self) -> Result<()> {
        if self.is_frozen() {
            return Ok(());
        }

        Ok(self.center_back.step(self.optimizer.as_mut())?)
    }

    pub fn zero_grad_center(&mut self) {
        self.center_back.zero_grad();
    }

    /// Stops every further update of `center_back`, from local steps and from fusion alike.
    ///
    /// Freezing is one-way, calling it again keeps the first epoch.
    pub fn freeze(&mut self, epoch: usize) {
        if self.frozen_at.is_none() {
            info!(participant = self.id.as_str(), epoch = epoch; "center_back frozen");
            self.frozen_at = Some(epoch);
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    pub fn frozen_at(&self) -> Option<usize> {
        self.frozen_at
    }

    /// Drops the cached activations and targets of `mode`.
    pub fn clear_caches(&mut self, mode: Mode) {
        let caches = self.caches_mut(mode);
        caches.activations.clear();
        caches.targets.clear();
    }

    pub fn cache_stats(&self, mode: Mode) -> CacheStats {
        self.caches(mode).activations.stats()
    }

    /// The amount of cached rows of `mode`.
    pub fn cached(&self, mode: Mode) -> usize {
        self.caches(mode).activations.len()
    }

    pub fn center_front(&self) -> &Segment {
        &self.center_front
    }

    pub fn center_back(&self) -> &Segment {
        &self.center_back
    }

    pub fn center_front_state(&self) -> Result<ParamState> {
        Ok(self.center_front.state()?)
    }

    pub fn center_back_state(&self) -> Result<ParamState> {
        Ok(self.center_back.state()?)
    }

    pub fn load_center_front_state(&mut self, state: &ParamState) -> Result<()> {
        Ok(self.center_front.load_state(state)?)
    }

    /// Replaces `center_back`'s parameters.
    ///
    /// # Returns
    /// An error if the counterpart is frozen.
    pub fn load_center_back_state(&mut self, state: &ParamState) -> Result<()> {
        if self.is_frozen() {
            return Err(MlErr::FrozenSegment {
                segment: self.center_back.name().to_string(),
            }
            .into());
        }

        Ok(self.center_back.load_state(state)?)
    }

    /// Runs both server segments without touching the caches, used for evaluation.
    pub fn predict(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let hidden = self.center_front.forward(x)?;
        self.run_center_back(hidden.view())
    }

    fn run_center_back(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.center_back.forward(x)?)
    }

    fn caches(&self, mode: Mode) -> &Caches {
        match mode {
            Mode::Train => &self.train,
            Mode::Test => &self.test,
        }
    }

    fn caches_mut(&mut self, mode: Mode) -> &mut Caches {
        match mode {
            Mode::Train => &mut self.train,
            Mode::Test => &mut self.test,
        }
    }
}
