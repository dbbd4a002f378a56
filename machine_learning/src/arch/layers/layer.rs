use ndarray::{Array2, ArrayView2};

use super::Dense;
use crate::{Result, arch::activations::ActFn, state::TensorSpec};

#[derive(Clone)]
pub enum Layer {
    Dense(Dense),
}
use Layer::*;

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    /// The amount of parameters this layer reads from its slice.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
        }
    }

    /// The (input, output) widths of this layer.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Dense(l) => l.dim(),
        }
    }

    /// Describes the named tensors living in this layer's parameter slice.
    ///
    /// # Arguments
    /// * `index` - The position of the layer inside its model, used as the name prefix.
    /// * `offset` - Where this layer's slice starts inside the model's parameters.
    pub fn tensors(&self, index: usize, offset: usize) -> Vec<TensorSpec> {
        match self {
            Dense(l) => l.tensors(index, offset),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(params, x),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(params, grad, d),
        }
    }
}
