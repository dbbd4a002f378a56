use log::debug;
use machine_learning::{
    ParamState, Segment,
    arch::loss::{CrossEntropy, LossFn},
    dataset::Dataset,
    optimization::Optimizer,
};
use ndarray::{Array2, ArrayView2};
use rand::{rngs::StdRng, seq::SliceRandom};

use crate::{
    Result, SplitErr,
    data::Shard,
    keys::KeyCounter,
    metrics::{self, EpochMetrics, EpochRecord},
    mode::Mode,
};

/// A batch of samples drawn from a participant's data.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }
}

/// What the front segment hands over to the server side.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontOutput {
    pub activation: Array2<f32>,
    pub keys: Vec<u64>,
    pub targets: Array2<f32>,
}

/// Walks over a dataset in batches, endlessly, reshuffling every pass when asked to.
#[derive(Debug)]
struct Cursor {
    order: Vec<usize>,
    pos: usize,
    shuffle: bool,
}

impl Cursor {
    fn new(len: usize, shuffle: bool) -> Self {
        Self {
            order: (0..len).collect(),
            pos: len,
            shuffle,
        }
    }

    fn next(&mut self, batch_size: usize, rng: &mut StdRng) -> &[usize] {
        if self.pos >= self.order.len() {
            self.pos = 0;
            if self.shuffle {
                self.order.shuffle(rng);
            }
        }

        let start = self.pos;
        self.pos = (start + batch_size).min(self.order.len());
        &self.order[start..self.pos]
    }

    /// Forces the next batch to start a new pass.
    fn rewind(&mut self) {
        self.pos = self.order.len();
    }
}

/// Per-mode state of a participant.
#[derive(Debug)]
struct Lane {
    data: Dataset,
    cursor: Cursor,
    keys: KeyCounter,
    metrics: EpochMetrics,
    last: Option<(Vec<usize>, Vec<usize>)>,
}

impl Lane {
    fn new(data: Dataset, shuffle: bool) -> Self {
        Self {
            cursor: Cursor::new(data.len(), shuffle),
            keys: KeyCounter::new(data.len()),
            data,
            metrics: EpochMetrics::new(),
            last: None,
        }
    }
}

/// The client side of a split network: a frozen `front` segment and a trainable `back` one,
/// together with the participant's private data.
pub struct Participant {
    id: String,
    front: Segment,
    back: Segment,
    optimizer: Box<dyn Optimizer>,
    loss_fn: CrossEntropy,
    train: Lane,
    test: Lane,
    eval: Dataset,
    batch_size: usize,
    rng: StdRng,
    pending: Option<Array2<f32>>,
}

impl Participant {
    /// Creates a new `Participant`.
    ///
    /// # Arguments
    /// * `id` - The participant's unique id.
    /// * `front` - The first segment, never trained.
    /// * `back` - The last segment, trained with `optimizer`.
    /// * `optimizer` - The optimizer of `back`.
    /// * `shard` - The participant's private data.
    /// * `batch_size` - The amount of samples per step.
    /// * `rng` - Used to shuffle the training data every pass.
    pub fn new(
        id: impl Into<String>,
        front: Segment,
        back: Segment,
        optimizer: Box<dyn Optimizer>,
        shard: Shard,
        batch_size: usize,
        rng: StdRng,
    ) -> Self {
        Self {
            id: id.into(),
            front: front.frozen(),
            back,
            optimizer,
            loss_fn: CrossEntropy::new(),
            train: Lane::new(shard.train, true),
            test: Lane::new(shard.test, false),
            eval: shard.eval,
            batch_size: batch_size.max(1),
            rng,
            pending: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The amount of samples of `mode`.
    pub fn sample_count(&self, mode: Mode) -> usize {
        self.lane(mode).data.len()
    }

    /// The amount of steps it takes to go over the data of `mode` once.
    pub fn iterations(&self, mode: Mode) -> usize {
        self.sample_count(mode).div_ceil(self.batch_size)
    }

    pub fn eval_data(&self) -> &Dataset {
        &self.eval
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Starts a new refresh window of `capacity` keys: keys and the data cursor rewind so the
    /// window is populated and consumed in the same order.
    pub fn begin_window(&mut self, mode: Mode, capacity: usize) {
        let lane = self.lane_mut(mode);
        lane.keys.resize(capacity);
        lane.cursor.rewind();
    }

    /// Draws the next batch of `mode`.
    pub fn next_batch(&mut self, mode: Mode) -> Result<Batch> {
        let batch_size = self.batch_size;
        let lane = match mode {
            Mode::Train => &mut self.train,
            Mode::Test => &mut self.test,
        };

        let indices = lane.cursor.next(batch_size, &mut self.rng);
        let (x, y) = lane.data.batch(indices)?;
        Ok(Batch { x, y })
    }

    /// Runs the frozen front segment and assigns a key to every sample of the batch.
    pub fn forward_front(&mut self, batch: &Batch, mode: Mode) -> Result<FrontOutput> {
        let activation = self.front.forward(batch.x.view())?;
        let keys = self.lane_mut(mode).keys.take(batch.len())?;

        Ok(FrontOutput {
            activation,
            keys,
            targets: batch.y.clone(),
        })
    }

    /// The keys of the next step when consuming a populated window.
    ///
    /// The front segment isn't run, only the cursors move, so the batch sizes follow the ones
    /// used when the window was populated.
    pub fn next_keys(&mut self, mode: Mode) -> Result<Vec<u64>> {
        let batch_size = self.batch_size;
        let lane = match mode {
            Mode::Train => &mut self.train,
            Mode::Test => &mut self.test,
        };

        let n = lane.cursor.next(batch_size, &mut self.rng).len();
        lane.keys.take(n)
    }

    pub fn forward_back(&mut self, activation: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.back.forward(activation)?)
    }

    /// Computes the loss of `prediction` and adds it to the running loss of `mode`.
    ///
    /// In training the loss gradient is kept for the following `backward` call.
    pub fn compute_loss(
        &mut self,
        prediction: ArrayView2<f32>,
        target: ArrayView2<f32>,
        mode: Mode,
    ) -> Result<f32> {
        if prediction.dim() != target.dim() {
            return Err(SplitErr::ShapeMismatch {
                name: "prediction".into(),
                got: prediction.shape().to_vec(),
                expected: target.shape().to_vec(),
            });
        }

        let loss = self.loss_fn.loss(prediction, target);
        if !loss.is_finite() {
            return Err(SplitErr::NonFiniteLoss {
                participant: self.id.clone(),
            });
        }

        if mode == Mode::Train {
            self.pending = Some(self.loss_fn.loss_prime(prediction, target));
        }

        let pred = metrics::argmax_rows(prediction);
        let target = metrics::argmax_rows(target);

        let lane = self.lane_mut(mode);
        lane.metrics.add_loss(loss);
        lane.last = Some((pred, target));
        Ok(loss)
    }

    /// Backpropagates the pending loss through `back`.
    ///
    /// # Returns
    /// The gradient with respect to `back`'s input, to be sent to the server, or
    /// `NoPendingLoss` if no loss was computed since the last call.
    pub fn backward(&mut self) -> Result<Array2<f32>> {
        let d = self.pending.take().ok_or_else(|| SplitErr::NoPendingLoss {
            participant: self.id.clone(),
        })?;

        Ok(self.back.backward(d)?)
    }

    pub fn step_back(&mut self) -> Result<()> {
        Ok(self.back.step(self.optimizer.as_mut())?)
    }

    pub fn zero_grad_back(&mut self) {
        self.back.zero_grad();
    }

    /// Throws away whatever a failed step left behind.
    pub fn discard_step(&mut self) {
        self.pending = None;
        self.back.zero_grad();
    }

    /// The macro F1 of the last prediction of `mode`, also added to the epoch's running metric.
    pub fn metric(&mut self, mode: Mode) -> f32 {
        let lane = self.lane_mut(mode);
        let Some((pred, target)) = lane.last.take() else {
            return 0.;
        };

        let f1 = metrics::macro_f1(&pred, &target);
        lane.metrics.add_step(f1, &pred, &target);
        f1
    }

    /// Balanced accuracy and macro F1 over every step of the running epoch.
    pub fn main_metric(&self, mode: Mode) -> (f32, f32) {
        self.lane(mode).metrics.main_metric()
    }

    /// Averages the running loss and metric over `iterations` and starts a new epoch.
    pub fn finish_epoch(&mut self, mode: Mode, iterations: usize) -> EpochRecord {
        let id = self.id.clone();
        let record = self.lane_mut(mode).metrics.finish_epoch(iterations);
        debug!(participant = id.as_str(); "{mode} epoch finished: f1={}", record.f1);
        record
    }

    /// One entry per finished epoch of `mode`.
    pub fn f1_history(&self, mode: Mode) -> Vec<f32> {
        self.lane(mode).metrics.f1_history()
    }

    pub fn history(&self, mode: Mode) -> &[EpochRecord] {
        self.lane(mode).metrics.history()
    }

    pub fn front(&self) -> &Segment {
        &self.front
    }

    pub fn back(&self) -> &Segment {
        &self.back
    }

    pub fn front_state(&self) -> Result<ParamState> {
        Ok(self.front.state()?)
    }

    pub fn back_state(&self) -> Result<ParamState> {
        Ok(self.back.state()?)
    }

    pub fn load_front_state(&mut self, state: &ParamState) -> Result<()> {
        Ok(self.front.load_state(state)?)
    }

    pub fn load_back_state(&mut self, state: &ParamState) -> Result<()> {
        Ok(self.back.load_state(state)?)
    }

    /// Runs the front segment alone, used for evaluation.
    pub fn predict_front(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.front.forward(x)?)
    }

    fn lane(&self, mode: Mode) -> &Lane {
        match mode {
            Mode::Train => &self.train,
            Mode::Test => &self.test,
        }
    }

    fn lane_mut(&mut self, mode: Mode) -> &mut Lane {
        match mode {
            Mode::Train => &mut self.train,
            Mode::Test => &mut self.test,
        }
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::{
        arch::{Sequential, layers::Layer},
        initialization::ConstParamGen,
        optimization::GradientDescent,
    };
    use ndarray::array;
    use rand::SeedableRng;

    use super::*;

    fn segment(name: &str, dim: (usize, usize), value: f32) -> Segment {
        let model = Sequential::new([Layer::dense(dim, None)]).unwrap();
        let size = (dim.0 + 1) * dim.1;
        Segment::new(name, model, &mut ConstParamGen::new(value, size)).unwrap()
    }

    fn participant(train: usize) -> Participant {
        let rows: Vec<f32> = (0..train)
            .flat_map(|i| [i as f32, 1.0, (i % 2) as f32, ((i + 1) % 2) as f32])
            .collect();
        let shard = Shard {
            train: Dataset::new(rows.clone(), 2, 2).unwrap(),
            test: Dataset::new(rows, 2, 2).unwrap(),
            eval: Dataset::empty(2, 2),
        };

        Participant::new(
            "ab12",
            segment("front", (2, 2), 0.1),
            segment("back", (2, 2), 0.1),
            Box::new(GradientDescent::new(0.1)),
            shard,
            2,
            StdRng::seed_from_u64(0),
        )
    }

    #[test]
    fn iterations_round_up() {
        let p = participant(5);
        assert_eq!(p.iterations(Mode::Train), 3);
        assert_eq!(p.sample_count(Mode::Test), 5);
    }

    #[test]
    fn front_assigns_sequential_keys() {
        let mut p = participant(5);
        p.begin_window(Mode::Train, 10);

        let mut keys = Vec::new();
        for _ in 0..p.iterations(Mode::Train) * 2 {
            let batch = p.next_batch(Mode::Train).unwrap();
            keys.extend(p.forward_front(&batch, Mode::Train).unwrap().keys);
        }

        assert_eq!(keys, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn consumption_replays_population_sizes() {
        let mut p = participant(5);
        p.begin_window(Mode::Test, 5);

        let sizes: Vec<_> = (0..3)
            .map(|_| p.next_keys(Mode::Test).unwrap().len())
            .collect();

        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(p.next_keys(Mode::Test).unwrap(), [0, 1]);
    }

    #[test]
    fn backward_needs_a_pending_loss() {
        let mut p = participant(2);
        let batch = p.next_batch(Mode::Train).unwrap();
        let out = p.forward_front(&batch, Mode::Train).unwrap();
        let pred = p.forward_back(out.activation.view()).unwrap();

        p.compute_loss(pred.view(), out.targets.view(), Mode::Train)
            .unwrap();
        assert_eq!(p.backward().unwrap().dim(), (2, 2));
        assert!(matches!(p.backward(), Err(SplitErr::NoPendingLoss { .. })));
    }

    #[test]
    fn step_only_touches_back() {
        let mut p = participant(2);
        let front = p.front().params().to_vec();
        let back = p.back().params().to_vec();

        let batch = p.next_batch(Mode::Train).unwrap();
        let out = p.forward_front(&batch, Mode::Train).unwrap();
        let pred = p.forward_back(out.activation.view()).unwrap();
        p.compute_loss(pred.view(), out.targets.view(), Mode::Train)
            .unwrap();
        p.backward().unwrap();
        p.step_back().unwrap();
        p.zero_grad_back();

        assert_eq!(p.front().params(), front);
        assert_ne!(p.back().params(), back);
        assert!(p.back().grad().iter().all(|&g| g == 0.));
    }

    #[test]
    fn non_finite_loss_is_transient() {
        let mut p = participant(1);
        let target = array![[f32::NAN, 0.0]];
        let err = p
            .compute_loss(array![[1.0, 0.0]].view(), target.view(), Mode::Train)
            .unwrap_err();

        assert!(err.is_transient());
        assert!(p.backward().is_err());
    }

    #[test]
    fn epoch_metric_is_the_mean_of_step_metrics() {
        let mut p = participant(2);
        let target = array![[1.0, 0.0], [0.0, 1.0]];

        p.compute_loss(array![[1.0, 0.0], [0.0, 1.0]].view(), target.view(), Mode::Test)
            .unwrap();
        assert_eq!(p.metric(Mode::Test), 1.);

        p.compute_loss(array![[0.0, 1.0], [1.0, 0.0]].view(), target.view(), Mode::Test)
            .unwrap();
        assert_eq!(p.metric(Mode::Test), 0.);

        let record = p.finish_epoch(Mode::Test, 2);
        assert_eq!(record.f1, 0.5);
        assert_eq!(p.f1_history(Mode::Test), [0.5]);
        assert_eq!(p.f1_history(Mode::Train), Vec::<f32>::new());
    }
}
