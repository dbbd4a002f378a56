use ndarray::{Array2, ArrayView2};

use crate::{Result, state::TensorSpec};

/// A differentiable function whose parameters live outside of it, in a flat slice.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// The width of the rows this model consumes.
    fn input_size(&self) -> usize;

    /// The width of the rows this model produces.
    fn output_size(&self) -> usize;

    /// Names every tensor inside the model's parameter slice.
    fn layout(&self) -> Vec<TensorSpec>;

    /// Makes a forward pass, keeping whatever metadata the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `x` - A batch of inputs, one sample per row.
    ///
    /// # Returns
    /// The output batch or an error if the shapes don't line up.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Propagates the delta of the last forward output back to the model's input.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `grad` - The gradient buffer, **accumulated** into.
    /// * `d` - The delta of the loss with respect to the last output.
    ///
    /// # Returns
    /// The delta of the loss with respect to the last input.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>)
    -> Result<Array2<f32>>;
}
