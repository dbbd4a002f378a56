use ndarray::{Array2, ArrayView2};

use crate::{
    MlErr, Result,
    arch::Model,
    initialization::ParamGen,
    optimization::Optimizer,
    state::{ParamState, TensorSpec},
};

/// One named piece of a split network: a model together with the parameters and gradient
/// buffer it runs on.
///
/// A frozen segment only runs forward passes; its parameters can still be replaced through
/// `load_state`.
pub struct Segment {
    name: String,
    model: Box<dyn Model>,
    layout: Vec<TensorSpec>,
    params: Vec<f32>,
    grad: Vec<f32>,
    trainable: bool,
}

impl Segment {
    /// Creates a new trainable `Segment`.
    ///
    /// # Arguments
    /// * `name` - The segment's name, used in errors and checkpoints.
    /// * `model` - The function this segment computes.
    /// * `param_gen` - Generator for the initial parameters.
    ///
    /// # Returns
    /// A new `Segment` or an error if the generator couldn't fill every parameter.
    pub fn new<M>(name: impl Into<String>, model: M, param_gen: &mut dyn ParamGen) -> Result<Self>
    where
        M: Model + 'static,
    {
        let name = name.into();
        let size = model.size();
        let mut params = Vec::with_capacity(size);

        while params.len() < size {
            let Some(sample) = param_gen.sample(size - params.len()) else {
                return Err(MlErr::ParamGenExhausted {
                    segment: name,
                    got: params.len(),
                    expected: size,
                });
            };

            params.extend(sample);
        }

        Ok(Self {
            name,
            layout: model.layout(),
            model: Box::new(model),
            params,
            grad: vec![0.; size],
            trainable: true,
        })
    }

    /// Marks this segment as frozen, it will refuse backward passes and optimizer steps.
    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn input_size(&self) -> usize {
        self.model.input_size()
    }

    pub fn output_size(&self) -> usize {
        self.model.output_size()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.model.forward(&self.params, x)
    }

    /// Accumulates the gradient of the last forward pass.
    ///
    /// # Returns
    /// The delta with respect to the segment's input.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        self.check_trainable()?;
        self.model.backward(&self.params, &mut self.grad, d)
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Applies one optimizer step with the accumulated gradient.
    pub fn step(&mut self, optimizer: &mut dyn Optimizer) -> Result<()> {
        self.check_trainable()?;
        optimizer.update_params(&self.grad, &mut self.params)
    }

    /// Snapshots the segment's parameters.
    pub fn state(&self) -> Result<ParamState> {
        ParamState::from_flat(&self.layout, &self.params)
    }

    /// Replaces the segment's parameters, nothing is written unless the whole state fits.
    pub fn load_state(&mut self, state: &ParamState) -> Result<()> {
        state.write_flat(&self.layout, &mut self.params)
    }

    fn check_trainable(&self) -> Result<()> {
        if !self.trainable {
            return Err(MlErr::FrozenSegment {
                segment: self.name.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{
        arch::{Sequential, layers::Layer},
        initialization::ConstParamGen,
        optimization::GradientDescent,
    };

    fn segment(value: f32) -> Segment {
        let model = Sequential::new([Layer::dense((2, 1), None)]).unwrap();
        Segment::new("center_back", model, &mut ConstParamGen::new(value, 3)).unwrap()
    }

    #[test]
    fn exhausted_generator_fails() {
        let model = Sequential::new([Layer::dense((2, 1), None)]).unwrap();
        let err = Segment::new("front", model, &mut ConstParamGen::new(0., 2)).err();

        assert!(matches!(
            err,
            Some(MlErr::ParamGenExhausted { got: 2, expected: 3, .. })
        ));
    }

    #[test]
    fn step_uses_accumulated_gradient() {
        let mut segment = segment(1.);
        let mut optimizer = GradientDescent::new(1.);

        segment.forward(array![[1.0, 2.0]].view()).unwrap();
        segment.backward(array![[1.0]]).unwrap();
        segment.step(&mut optimizer).unwrap();

        assert_eq!(segment.params(), [0.0, -1.0, 0.0]);

        segment.zero_grad();
        assert!(segment.grad().iter().all(|&g| g == 0.));
    }

    #[test]
    fn frozen_segment_refuses_training() {
        let mut segment = segment(1.).frozen();
        let mut optimizer = GradientDescent::new(1.);

        segment.forward(array![[1.0, 2.0]].view()).unwrap();
        assert!(segment.backward(array![[1.0]]).is_err());
        assert!(segment.step(&mut optimizer).is_err());
        assert_eq!(segment.params(), [1.0; 3]);
    }

    #[test]
    fn state_round_trip() {
        let source = segment(0.25);
        let mut target = segment(1.);

        target.load_state(&source.state().unwrap()).unwrap();
        assert_eq!(target.params(), source.params());
    }
}
