use std::collections::BTreeSet;

use ndarray::{ArrayView2, Axis};

/// The index of the largest value of every row.
pub fn argmax_rows(batch: ArrayView2<f32>) -> Vec<usize> {
    batch
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv { (i, v) } else { (bi, bv) }
                })
                .0
        })
        .collect()
}

/// The fraction of predictions equal to their target.
pub fn accuracy(pred: &[usize], target: &[usize]) -> f32 {
    if target.is_empty() {
        return 0.;
    }

    let hits = pred.iter().zip(target).filter(|(p, t)| p == t).count();
    hits as f32 / target.len() as f32
}

/// Unweighted mean of the per-class F1 scores, over every class seen in either slice.
pub fn macro_f1(pred: &[usize], target: &[usize]) -> f32 {
    let classes: BTreeSet<_> = pred.iter().chain(target).copied().collect();
    if classes.is_empty() {
        return 0.;
    }

    let total: f32 = classes
        .iter()
        .map(|&c| {
            let (mut tp, mut fp, mut fne) = (0f32, 0f32, 0f32);

            for (&p, &t) in pred.iter().zip(target) {
                match (p == c, t == c) {
                    (true, true) => tp += 1.,
                    (true, false) => fp += 1.,
                    (false, true) => fne += 1.,
                    _ => {}
                }
            }

            let denom = 2. * tp + fp + fne;
            if denom == 0. { 0. } else { 2. * tp / denom }
        })
        .sum();

    total / classes.len() as f32
}

/// Unweighted mean of the per-class recall, over every class present in `target`.
pub fn balanced_accuracy(pred: &[usize], target: &[usize]) -> f32 {
    let classes: BTreeSet<_> = target.iter().copied().collect();
    if classes.is_empty() {
        return 0.;
    }

    let total: f32 = classes
        .iter()
        .map(|&c| {
            let (hits, support) = pred
                .iter()
                .zip(target)
                .filter(|&(_, &t)| t == c)
                .fold((0, 0), |(h, s), (&p, _)| (h + (p == c) as usize, s + 1));

            hits as f32 / support as f32
        })
        .sum();

    total / classes.len() as f32
}

/// The metrics of one participant over one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub f1: f32,
    pub loss: f32,
    pub balanced_accuracy: f32,
    pub macro_f1: f32,
}

/// Running per-epoch accumulators of a participant for one mode.
#[derive(Debug, Default)]
pub struct EpochMetrics {
    loss: f32,
    f1: f32,
    pred: Vec<usize>,
    target: Vec<usize>,
    history: Vec<EpochRecord>,
}

impl EpochMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_loss(&mut self, loss: f32) {
        self.loss += loss;
    }

    /// Accumulates the metric of one step and keeps its predictions for the epoch's main metric.
    pub fn add_step(&mut self, f1: f32, pred: &[usize], target: &[usize]) {
        self.f1 += f1;
        self.pred.extend_from_slice(pred);
        self.target.extend_from_slice(target);
    }

    /// Balanced accuracy and macro F1 over every prediction of the running epoch.
    pub fn main_metric(&self) -> (f32, f32) {
        (
            balanced_accuracy(&self.pred, &self.target),
            macro_f1(&self.pred, &self.target),
        )
    }

    /// Divides the running sums by `iterations`, appends the result to the history and resets
    /// the accumulators for the next epoch.
    pub fn finish_epoch(&mut self, iterations: usize) -> EpochRecord {
        let n = iterations.max(1) as f32;
        let (balanced_accuracy, macro_f1) = self.main_metric();

        let record = EpochRecord {
            f1: self.f1 / n,
            loss: self.loss / n,
            balanced_accuracy,
            macro_f1,
        };

        self.history.push(record);
        self.loss = 0.;
        self.f1 = 0.;
        self.pred.clear();
        self.target.clear();
        record
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    /// The per-epoch F1 values, one per finished epoch.
    pub fn f1_history(&self) -> Vec<f32> {
        self.history.iter().map(|r| r.f1).collect()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.history.last()
    }
}

/// The mean of `values`, zero when empty.
pub fn mean(values: impl IntoIterator<Item = f32>) -> f32 {
    let (sum, n) = values
        .into_iter()
        .fold((0., 0usize), |(s, n), v| (s + v, n + 1));

    if n == 0 { 0. } else { sum / n as f32 }
}
