use std::{cell::RefCell, collections::HashSet, rc::Rc};

use log::{debug, info, warn};
use machine_learning::{ParamState, optimization::Adam};
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng, seq::IndexedRandom};

use crate::{
    Result, SplitErr,
    checkpoint::CheckpointStore,
    config::{EvalSchedule, RunConfig},
    context::RunContext,
    data::DatasetProvider,
    merge,
    metrics::{self, EpochRecord},
    mode::{ExecMode, Mode, Phase},
    participant::Participant,
    registry::{self, SegmentDims, SegmentRegistry},
    server::{CenterInput, ServerCounterpart},
    sink::{MetricEvent, MetricsSink},
};

/// The id of the single participant of a pooled run.
pub const POOLED_ID: &str = "pooled_client";

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";
const ID_LEN: usize = 4;

/// What a finished run reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Mean train F1 over the participants, one entry per epoch.
    pub train_f1: Vec<f32>,
    /// Mean test F1 over the participants, one entry per epoch.
    pub test_f1: Vec<f32>,
    pub best_test_f1: Option<f32>,
    pub best_epoch: Option<usize>,
    pub personalized_at: Option<usize>,
    /// The epochs the caches were (re)populated at.
    pub populations: Vec<usize>,
    /// Training and test steps skipped because of a transient error.
    pub skipped_steps: usize,
    /// Held-out accuracy per participant, from the last evaluation.
    pub evaluation: Vec<(String, f32)>,
}

impl RunSummary {
    /// The mean held-out accuracy over every evaluated participant.
    pub fn mean_evaluation(&self) -> Option<f32> {
        if self.evaluation.is_empty() {
            return None;
        }

        Some(metrics::mean(self.evaluation.iter().map(|(_, a)| *a)))
    }
}

/// The best mean test F1 seen so far, and optionally the trainable segments at that point.
#[derive(Default)]
struct Best {
    f1: Option<f32>,
    epoch: Option<usize>,
    snapshots: Vec<(ParamState, ParamState)>,
}

/// Drives a split learning run: cache population, the per-epoch train/test protocol, weight
/// fusion and the personalization transition.
pub struct Orchestrator {
    config: RunConfig,
    ctx: RunContext,
    sink: Box<dyn MetricsSink>,
    checkpoints: Option<CheckpointStore>,
    personalizing: bool,
    best: Best,
    summary: RunSummary,
}

impl Orchestrator {
    /// Creates a new `Orchestrator` over an already built context.
    ///
    /// # Returns
    /// An error if the config is invalid or the context is empty.
    pub fn new(config: RunConfig, ctx: RunContext, sink: Box<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;

        if ctx.is_empty() {
            return Err(SplitErr::InvalidConfig("no participant to train".into()));
        }

        let checkpoints = config.checkpoint_dir.as_ref().map(|root| {
            CheckpointStore::new(root, &config.data.name, &config.segments, config.split)
        });

        Ok(Self {
            config,
            ctx,
            sink,
            checkpoints,
            personalizing: false,
            best: Best::default(),
            summary: RunSummary::default(),
        })
    }

    /// Builds every participant and counterpart described by `config`.
    ///
    /// Segment configurations are resolved once. A participant whose segments fail to build
    /// is left out with a warning, setup only fails if none is left.
    pub fn setup(
        config: RunConfig,
        provider: &dyn DatasetProvider,
        registry: &SegmentRegistry,
        sink: Box<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;

        let ctor = registry
            .resolve(&config.segments)
            .map_err(|e| e.during(Phase::Setup, 0, None))?;

        let dims = SegmentDims {
            x_size: provider.x_size(),
            classes: provider.classes(),
        };

        let count = config.participant_count();
        let ids = if config.pooling {
            vec![POOLED_ID.to_string()]
        } else {
            participant_ids(count, &mut StdRng::seed_from_u64(config.seed))
        };

        let mut participants = Vec::with_capacity(count);
        let mut servers = Vec::with_capacity(count);
        let mut first_err = None;

        for (i, id) in ids.into_iter().enumerate() {
            let shard = if config.pooling {
                provider.pooled()
            } else {
                provider.shard(i, count)
            }
            .map_err(|e| e.during(Phase::Setup, 0, Some(&id)))?;

            // Every participant starts from the same segment weights.
            let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(sub_seed(config.seed, 0))));
            let set = match registry::build_segments(ctor, &id, dims, rng) {
                Ok(set) => set,
                Err(e) => {
                    warn!(participant = id.as_str(); "left out of the run: {e}");
                    first_err.get_or_insert(e);
                    continue;
                }
            };

            let back_opt = adam(set.back.size(), config.learning_rate.back, config.weight_decay);
            let center_opt = adam(
                set.center_back.size(),
                config.learning_rate.center_back,
                config.weight_decay,
            );

            debug!(participant = id.as_str(); "built with {} train samples", shard.train.len());

            servers.push(ServerCounterpart::new(
                id.clone(),
                set.center_front,
                set.center_back,
                Box::new(center_opt),
            ));
            participants.push(Participant::new(
                id,
                set.front,
                set.back,
                Box::new(back_opt),
                shard,
                config.batch_size.train,
                StdRng::seed_from_u64(sub_seed(config.seed ^ 0x5eed, i)),
            ));
        }

        if participants.is_empty() {
            let err = first_err
                .unwrap_or_else(|| SplitErr::InvalidConfig("no participant to train".into()));
            return Err(err.during(Phase::Setup, 0, None));
        }

        let ctx = RunContext::new(participants, servers)?;
        let mut orchestrator = Self::new(config, ctx, sink)?;

        if orchestrator.config.load_checkpoints {
            orchestrator
                .load_models()
                .map_err(|e| e.during(Phase::Setup, 0, None))?;
        }

        Ok(orchestrator)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.ctx
    }

    pub fn is_personalizing(&self) -> bool {
        self.personalizing
    }

    /// How the server side runs outside of population.
    pub fn exec_mode(&self) -> ExecMode {
        if self.config.use_cache {
            ExecMode::Cached
        } else {
            ExecMode::Direct
        }
    }

    /// Trains and tests for the configured amount of epochs.
    pub fn fit(&mut self) -> Result<RunSummary> {
        if self.config.pooling {
            info!("pooling mode: a single participant trains on all the data");
        }

        for epoch in 0..self.config.epochs {
            self.run_epoch(epoch)?;
        }

        if self.config.evaluate == EvalSchedule::Final {
            self.evaluate(self.config.epochs)?;
        }

        self.release();

        if let (Some(f1), Some(epoch)) = (self.summary.best_test_f1, self.summary.best_epoch) {
            info!(epoch = epoch; "best mean test f1={f1}");
        }

        Ok(self.summary.clone())
    }

    /// Runs one epoch of the schedule: refreshes the caches and enters personalization when
    /// due, then trains, tests and evaluates if configured to every epoch.
    pub fn run_epoch(&mut self, epoch: usize) -> Result<()> {
        if self.exec_mode() == ExecMode::Cached && self.refresh_due(epoch) {
            if self.config.refresh_rate != 0 {
                info!(epoch = epoch; "refreshing caches for the next {} epochs", self.config.refresh_rate);
            }

            self.populate(epoch)?;
        }

        if self.config.personalization_epoch == Some(epoch) && !self.personalizing {
            self.personalize(epoch)?;
        }

        self.train_one_epoch(epoch)?;
        self.test_one_epoch(epoch)?;

        if self.config.evaluate == EvalSchedule::EveryEpoch {
            self.evaluate(epoch)?;
        }

        Ok(())
    }

    /// A zero refresh rate populates once, before the first epoch.
    fn refresh_due(&self, epoch: usize) -> bool {
        match self.config.refresh_rate {
            0 => self.summary.populations.is_empty(),
            rate => epoch % rate == 0,
        }
    }

    /// Clears and refills every train and test cache.
    ///
    /// A train window holds `refresh_factor` passes over each participant's training data, a
    /// test window a single pass over its test data.
    pub fn populate(&mut self, epoch: usize) -> Result<()> {
        let factor = self.config.refresh_factor;

        for i in 0..self.ctx.len() {
            let (p, s) = self.ctx.pair_mut(i)?;
            let id = p.id().to_string();

            populate_pair(p, s, factor).map_err(|e| e.during(Phase::Populate, epoch, Some(&id)))?;

            debug!(
                participant = id.as_str(), epoch = epoch;
                "cached {} train and {} test rows", s.cached(Mode::Train), s.cached(Mode::Test)
            );
        }

        self.summary.populations.push(epoch);
        Ok(())
    }

    /// Runs one training epoch for every participant, then fuses the trainable segments.
    pub fn train_one_epoch(&mut self, epoch: usize) -> Result<()> {
        self.train_participants(epoch)?;

        if !self.config.pooling {
            self.merge_model_weights(epoch)?;
        }

        Ok(())
    }

    /// Runs the local training steps of one epoch for every participant, without fusion.
    pub fn train_participants(&mut self, epoch: usize) -> Result<()> {
        let exec = self.exec_mode();
        let mut iterations = Vec::with_capacity(self.ctx.len());

        for i in 0..self.ctx.len() {
            let (p, s) = self.ctx.pair_mut(i)?;
            let id = p.id().to_string();
            let n = p.iterations(Mode::Train);

            for _ in 0..n {
                match train_step(p, s, exec) {
                    Ok((loss, f1)) => self.sink.emit(MetricEvent::Step {
                        epoch,
                        participant: id.clone(),
                        mode: Mode::Train,
                        loss,
                        f1,
                    }),
                    Err(e) if e.is_transient() => {
                        warn!(participant = id.as_str(), epoch = epoch; "skipping train step: {e}");
                        p.discard_step();
                        s.zero_grad_center();
                        self.summary.skipped_steps += 1;
                    }
                    Err(e) => return Err(e.during(Phase::Train, epoch, Some(&id))),
                }
            }

            iterations.push(n);
        }

        let mean = self.finish_epoch(Mode::Train, epoch, &iterations);
        self.summary.train_f1.push(mean);

        Ok(())
    }

    /// Runs one forward-only epoch over every participant's test data.
    pub fn test_one_epoch(&mut self, epoch: usize) -> Result<()> {
        let exec = self.exec_mode();
        let mut iterations = Vec::with_capacity(self.ctx.len());

        for i in 0..self.ctx.len() {
            let (p, s) = self.ctx.pair_mut(i)?;
            let id = p.id().to_string();
            let n = p.iterations(Mode::Test);

            for _ in 0..n {
                match test_step(p, s, exec) {
                    Ok((loss, f1)) => self.sink.emit(MetricEvent::Step {
                        epoch,
                        participant: id.clone(),
                        mode: Mode::Test,
                        loss,
                        f1,
                    }),
                    Err(e) if e.is_transient() => {
                        warn!(participant = id.as_str(), epoch = epoch; "skipping test step: {e}");
                        self.summary.skipped_steps += 1;
                    }
                    Err(e) => return Err(e.during(Phase::Test, epoch, Some(&id))),
                }
            }

            iterations.push(n);
        }

        let mean = self.finish_epoch(Mode::Test, epoch, &iterations);
        self.summary.test_f1.push(mean);

        if self.best.f1.is_none_or(|best| mean > best) {
            self.record_best(epoch, mean)?;
        }

        Ok(())
    }

    /// Fuses `center_back` and `back` across participants with sample-count weights and hands
    /// the fused state back to every member of the pool.
    ///
    /// `center_back` is only fused before personalization and never for frozen counterparts.
    /// `back` keeps being fused while personalizing unless configured otherwise. Participants
    /// without training samples never join a pool.
    pub fn merge_model_weights(&mut self, epoch: usize) -> Result<()> {
        debug!(epoch = epoch; "merging model weights");
        let factor = self.config.refresh_factor as f64;

        if !self.personalizing {
            let pool: Vec<usize> = (0..self.ctx.len())
                .filter(|&i| {
                    let (p, s) = (&self.ctx.participants()[i], &self.ctx.servers()[i]);
                    !s.is_frozen() && p.sample_count(Mode::Train) > 0
                })
                .collect();

            self.merge_pool(
                &pool,
                |ctx, i| ctx.servers()[i].center_back_state(),
                |ctx, i, state| ctx.servers_mut()[i].load_center_back_state(state),
                |ctx, i| ctx.participants()[i].sample_count(Mode::Train) as f64 * factor,
            )
            .map_err(|e| e.during(Phase::Merge, epoch, None))?;
        }

        if !self.personalizing || self.config.merge_back_while_personalizing {
            let pool: Vec<usize> = (0..self.ctx.len())
                .filter(|&i| self.ctx.participants()[i].sample_count(Mode::Train) > 0)
                .collect();

            self.merge_pool(
                &pool,
                |ctx, i| ctx.participants()[i].back_state(),
                |ctx, i, state| ctx.participants_mut()[i].load_back_state(state),
                |ctx, i| ctx.participants()[i].sample_count(Mode::Train) as f64,
            )
            .map_err(|e| e.during(Phase::Merge, epoch, None))?;
        }

        Ok(())
    }

    /// Switches to personalization: optionally restores the best snapshot, then freezes every
    /// counterpart's `center_back` for the rest of the run.
    pub fn personalize(&mut self, epoch: usize) -> Result<()> {
        info!(epoch = epoch; "personalizing, freezing every center_back");
        self.personalizing = true;
        self.summary.personalized_at = Some(epoch);

        if self.config.restore_best && !self.best.snapshots.is_empty() {
            let snapshots = std::mem::take(&mut self.best.snapshots);

            for (i, (center_back, back)) in snapshots.iter().enumerate() {
                let (p, s) = self.ctx.pair_mut(i)?;
                let id = p.id().to_string();

                s.load_center_back_state(center_back)
                    .and_then(|_| p.load_back_state(back))
                    .map_err(|e| e.during(Phase::Personalize, epoch, Some(&id)))?;
            }

            self.best.snapshots = snapshots;
        }

        for s in self.ctx.servers_mut() {
            s.freeze(epoch);
        }

        self.sink.emit(MetricEvent::Personalization { epoch });
        Ok(())
    }

    /// Runs the full four-segment pipeline over every participant's held-out data, without
    /// caching or fusion.
    ///
    /// # Returns
    /// The accuracy of every participant that has evaluation data.
    pub fn evaluate(&mut self, epoch: usize) -> Result<Vec<(String, f32)>> {
        let batch_size = self.config.batch_size.test;
        let mut results = Vec::with_capacity(self.ctx.len());

        for i in 0..self.ctx.len() {
            let (p, s) = self.ctx.pair_mut(i)?;
            let id = p.id().to_string();

            let Some(accuracy) = evaluate_pair(p, s, batch_size)
                .map_err(|e| e.during(Phase::Evaluate, epoch, Some(&id)))?
            else {
                debug!(participant = id.as_str(); "no evaluation data");
                continue;
            };

            self.sink.emit(MetricEvent::Evaluation {
                participant: id.clone(),
                accuracy,
            });
            results.push((id, accuracy));
        }

        let mean = metrics::mean(results.iter().map(|(_, a)| *a));
        info!(epoch = epoch; "average evaluation accuracy={mean}");

        self.summary.evaluation = results.clone();
        Ok(results)
    }

    /// Writes every segment of every participant to the checkpoint store.
    pub fn save_models(&self) -> Result<()> {
        let Some(store) = &self.checkpoints else {
            return Ok(());
        };

        for (p, s) in self.ctx.participants().iter().zip(self.ctx.servers()) {
            store.save(p.id(), "front", &p.front_state()?)?;
            store.save(p.id(), "center_front", &s.center_front_state()?)?;
            store.save(p.id(), "center_back", &s.center_back_state()?)?;
            store.save(p.id(), "back", &p.back_state()?)?;
        }

        Ok(())
    }

    /// Replaces every segment of every participant with the checkpointed one.
    pub fn load_models(&mut self) -> Result<()> {
        let Some(store) = self.checkpoints.clone() else {
            return Ok(());
        };

        for i in 0..self.ctx.len() {
            let (p, s) = self.ctx.pair_mut(i)?;
            let id = p.id().to_string();

            p.load_front_state(&store.load(&id, "front")?)?;
            s.load_center_front_state(&store.load(&id, "center_front")?)?;
            s.load_center_back_state(&store.load(&id, "center_back")?)?;
            p.load_back_state(&store.load(&id, "back")?)?;
            info!(participant = id.as_str(); "segments restored from {}", store.dir().display());
        }

        Ok(())
    }

    /// Drops every cached window.
    pub fn release(&mut self) {
        for s in self.ctx.servers_mut() {
            s.clear_caches(Mode::Train);
            s.clear_caches(Mode::Test);
        }
    }

    /// Finalizes the epoch of every participant and reports the averages.
    ///
    /// # Returns
    /// The mean F1 over the participants that ran at least one step.
    fn finish_epoch(&mut self, mode: Mode, epoch: usize, iterations: &[usize]) -> f32 {
        let mut records: Vec<EpochRecord> = Vec::with_capacity(iterations.len());

        for (p, &n) in self.ctx.participants_mut().iter_mut().zip(iterations) {
            let record = p.finish_epoch(mode, n);

            self.sink.emit(MetricEvent::Participant {
                epoch,
                participant: p.id().to_string(),
                mode,
                f1: record.f1,
                loss: record.loss,
                balanced_accuracy: record.balanced_accuracy,
                macro_f1: record.macro_f1,
            });

            if n > 0 {
                records.push(record);
            }
        }

        let f1 = metrics::mean(records.iter().map(|r| r.f1));

        self.sink.emit(MetricEvent::Epoch {
            epoch,
            mode,
            f1,
            loss: metrics::mean(records.iter().map(|r| r.loss)),
            balanced_accuracy: metrics::mean(records.iter().map(|r| r.balanced_accuracy)),
            macro_f1: metrics::mean(records.iter().map(|r| r.macro_f1)),
        });

        f1
    }

    fn record_best(&mut self, epoch: usize, f1: f32) -> Result<()> {
        info!(epoch = epoch; "new best mean test f1={f1}");
        self.best.f1 = Some(f1);
        self.best.epoch = Some(epoch);
        self.summary.best_test_f1 = Some(f1);
        self.summary.best_epoch = Some(epoch);

        if self.config.restore_best && !self.personalizing {
            self.best.snapshots = self
                .ctx
                .participants()
                .iter()
                .zip(self.ctx.servers())
                .map(|(p, s)| -> Result<(ParamState, ParamState)> {
                    Ok((s.center_back_state()?, p.back_state()?))
                })
                .collect::<Result<Vec<_>>>()?;
        }

        self.save_models()
            .map_err(|e| e.during(Phase::Checkpoint, epoch, None))
    }

    /// Merges the states of `pool` and loads the result into every member.
    ///
    /// Nothing is loaded unless the fused state fits every member.
    fn merge_pool<G, L, W>(&mut self, pool: &[usize], get: G, load: L, weight: W) -> Result<()>
    where
        G: Fn(&RunContext, usize) -> Result<ParamState>,
        L: Fn(&mut RunContext, usize, &ParamState) -> Result<()>,
        W: Fn(&RunContext, usize) -> f64,
    {
        if pool.is_empty() {
            return Ok(());
        }

        let states = pool
            .iter()
            .map(|&i| get(&self.ctx, i))
            .collect::<Result<Vec<_>>>()?;
        let weights: Vec<f64> = pool.iter().map(|&i| weight(&self.ctx, i)).collect();

        let refs: Vec<&ParamState> = states.iter().collect();
        let merged = merge::merge(&refs, &weights)?;

        for state in &states {
            check_fits(state, &merged)?;
        }

        for &i in pool {
            load(&mut self.ctx, i, &merged)?;
        }

        Ok(())
    }
}

fn populate_pair(p: &mut Participant, s: &mut ServerCounterpart, factor: usize) -> Result<()> {
    for mode in [Mode::Train, Mode::Test] {
        let passes = if mode == Mode::Train { factor } else { 1 };
        let capacity = p.sample_count(mode) * passes;

        s.clear_caches(mode);
        p.begin_window(mode, capacity);

        for _ in 0..p.iterations(mode) * passes {
            let batch = p.next_batch(mode)?;
            let out = p.forward_front(&batch, mode)?;
            s.forward_center_front(&out, mode, ExecMode::Populate)?;
        }

        p.begin_window(mode, capacity);
    }

    Ok(())
}

/// Gets the `center_back` input and targets of the next step of `mode`.
fn center_input(
    p: &mut Participant,
    s: &mut ServerCounterpart,
    mode: Mode,
    exec: ExecMode,
) -> Result<(CenterInput, Array2<f32>)> {
    match exec {
        ExecMode::Cached => {
            let keys = p.next_keys(mode)?;
            let targets = s.targets(&keys, mode)?;
            Ok((CenterInput::Keys(keys), targets))
        }
        ExecMode::Direct => {
            let batch = p.next_batch(mode)?;
            let out = p.forward_front(&batch, mode)?;
            let activation = s.forward_center_front(&out, mode, exec)?;
            Ok((CenterInput::Activation(activation), out.targets))
        }
        ExecMode::Populate => Err(SplitErr::ModeViolation {
            participant: p.id().to_string(),
            op: "step",
            mode: exec,
        }),
    }
}

fn train_step(p: &mut Participant, s: &mut ServerCounterpart, exec: ExecMode) -> Result<(f32, f32)> {
    let (input, targets) = center_input(p, s, Mode::Train, exec)?;
    let hidden = s.forward_center_back(input, Mode::Train)?;
    let prediction = p.forward_back(hidden.view())?;
    let loss = p.compute_loss(prediction.view(), targets.view(), Mode::Train)?;

    let grad = p.backward()?;
    s.backward_center(grad)?;

    p.step_back()?;
    p.zero_grad_back();
    s.step_center()?;
    s.zero_grad_center();

    Ok((loss, p.metric(Mode::Train)))
}

fn test_step(p: &mut Participant, s: &mut ServerCounterpart, exec: ExecMode) -> Result<(f32, f32)> {
    let (input, targets) = center_input(p, s, Mode::Test, exec)?;
    let hidden = s.forward_center_back(input, Mode::Test)?;
    let prediction = p.forward_back(hidden.view())?;
    let loss = p.compute_loss(prediction.view(), targets.view(), Mode::Test)?;

    Ok((loss, p.metric(Mode::Test)))
}

fn evaluate_pair(
    p: &mut Participant,
    s: &mut ServerCounterpart,
    batch_size: usize,
) -> Result<Option<f32>> {
    let len = p.eval_data().len();
    if len == 0 {
        return Ok(None);
    }

    let mut pred = Vec::with_capacity(len);
    let mut target = Vec::with_capacity(len);
    let indices: Vec<usize> = (0..len).collect();

    for chunk in indices.chunks(batch_size.max(1)) {
        let (x, y) = p.eval_data().batch(chunk)?;
        let hidden = p.predict_front(x.view())?;
        let hidden = s.predict(hidden.view())?;
        let out = p.forward_back(hidden.view())?;

        pred.extend(metrics::argmax_rows(out.view()));
        target.extend(metrics::argmax_rows(y.view()));
    }

    Ok(Some(metrics::accuracy(&pred, &target)))
}

/// Checks that `merged` can replace `current`: same names, same shapes.
fn check_fits(current: &ParamState, merged: &ParamState) -> Result<()> {
    for (name, tensor) in current.iter() {
        let got = merged.get(name).map(|t| t.shape().to_vec()).unwrap_or_default();

        if got != tensor.shape() {
            return Err(SplitErr::ShapeMismatch {
                name: name.clone(),
                got,
                expected: tensor.shape().to_vec(),
            });
        }
    }

    Ok(())
}

fn adam(len: usize, learning_rate: f32, weight_decay: f32) -> Adam {
    Adam::new(len, learning_rate, 0.9, 0.999, 1e-8).with_weight_decay(weight_decay)
}

/// Unique random ids made of `ID_LEN` distinct characters.
fn participant_ids(n: usize, rng: &mut StdRng) -> Vec<String> {
    let mut seen = HashSet::with_capacity(n);
    let mut ids = Vec::with_capacity(n);

    while ids.len() < n {
        let id: String = ID_ALPHABET
            .choose_multiple(rng, ID_LEN)
            .map(|&c| c as char)
            .collect();

        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }

    ids
}

fn sub_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(index as u64 + 1)
}
