use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;

/// Softmax followed by the categorical cross-entropy against one-hot targets.
///
/// The model's last layer is expected to output raw logits.
#[derive(Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    pub fn new() -> Self {
        Self
    }

    /// Row-wise softmax, shifted by each row's maximum.
    pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
        let mut probs = logits.to_owned();

        for mut row in probs.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }

        probs
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let rows = y_pred.nrows().max(1) as f32;
        let probs = Self::softmax(y_pred);

        let total: f32 = probs
            .iter()
            .zip(y.iter())
            .filter(|&(_, &t)| t != 0.)
            .map(|(&p, &t)| -t * p.max(f32::MIN_POSITIVE).ln())
            .sum();

        total / rows
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let rows = y_pred.nrows().max(1) as f32;
        (Self::softmax(y_pred) - &y) / rows
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn softmax_rows_sum_to_one() {
        let probs = CrossEntropy::softmax(array![[1.0, 2.0, 3.0], [1000.0, 0.0, 0.0]].view());

        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!(probs[[1, 0]] > 0.999);
    }

    #[test]
    fn uniform_logits_cost_ln_classes() {
        let loss = CrossEntropy.loss(array![[0.0, 0.0]].view(), array![[1.0, 0.0]].view());
        assert!((loss - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn prime_is_probs_minus_targets() {
        let d = CrossEntropy.loss_prime(array![[0.0, 0.0]].view(), array![[1.0, 0.0]].view());
        assert_eq!(d, array![[-0.5, 0.5]]);
    }
}
