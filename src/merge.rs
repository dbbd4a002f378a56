use ndarray::ArrayD;

use machine_learning::ParamState;

use crate::{Result, SplitErr};

/// Fuses several parameter states into their weighted average.
///
/// Every tensor name present in all the states is averaged as `Σ(state_i · w_i) / Σ w_i`,
/// names missing from at least one state are left out of the result. The sums are accumulated
/// in `f64` following the order of `states`, so equal inputs always give bit-identical outputs.
///
/// # Arguments
/// * `states` - The states to fuse.
/// * `weights` - One non-negative weight per state.
///
/// # Returns
/// The fused state or an error if the inputs are empty, the weights are invalid or two states
/// disagree on the shape of a tensor.
pub fn merge(states: &[&ParamState], weights: &[f64]) -> Result<ParamState> {
    if states.len() != weights.len() {
        return Err(SplitErr::WeightCountMismatch {
            states: states.len(),
            weights: weights.len(),
        });
    }

    if let Some((index, &weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.)
    {
        return Err(SplitErr::InvalidWeight { index, weight });
    }

    let total: f64 = weights.iter().sum();
    let Some((first, rest)) = states.split_first() else {
        return Err(SplitErr::EmptyInput);
    };

    if total <= 0. {
        return Err(SplitErr::EmptyInput);
    }

    let mut merged = ParamState::new();

    for (name, tensor) in first.iter() {
        let shared = rest.iter().all(|state| state.contains(name));
        if !shared {
            continue;
        }

        let mut acc = ArrayD::<f64>::zeros(tensor.raw_dim());

        for (state, &w) in states.iter().zip(weights) {
            let Some(other) = state.get(name) else {
                continue;
            };

            if other.shape() != acc.shape() {
                return Err(SplitErr::ShapeMismatch {
                    name: name.clone(),
                    got: other.shape().to_vec(),
                    expected: acc.shape().to_vec(),
                });
            }

            acc.zip_mut_with(other, |a, &v| *a += v as f64 * w);
        }

        merged.insert(name.clone(), acc.mapv(|a| (a / total) as f32));
    }

    Ok(merged)
}
