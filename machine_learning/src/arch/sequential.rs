use std::mem;

use ndarray::{Array2, ArrayView2};

use super::{Model, layers::Layer};
use crate::{MlErr, Result, state::TensorSpec};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance, or an error if there are no layers or two adjacent
    /// layers disagree on their shared width.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<_> = layers.into_iter().collect();

        if layers.is_empty() {
            return Err(MlErr::EmptyModel);
        }

        for pair in layers.windows(2) {
            let (_, prev_m) = pair[0].dim();
            let (curr_n, _) = pair[1].dim();

            if prev_m != curr_n {
                return Err(MlErr::SizeMismatch {
                    what: "adjacent layer widths",
                    got: curr_n,
                    expected: prev_m,
                });
            }
        }

        Ok(Self { layers })
    }

    /// Splits the model's parameter slice into one slice per layer.
    fn chunks<'a>(&self, params: &'a [f32]) -> Result<Vec<&'a [f32]>> {
        self.check_len("model parameters", params.len())?;

        let mut rest = params;
        let mut chunks = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let (head, tail) = rest.split_at(layer.size());
            chunks.push(head);
            rest = tail;
        }

        Ok(chunks)
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.size();

        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    fn input_size(&self) -> usize {
        self.layers[0].dim().0
    }

    fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].dim().1
    }

    fn layout(&self) -> Vec<TensorSpec> {
        let mut offset = 0;
        let mut layout = Vec::new();

        for (i, layer) in self.layers.iter().enumerate() {
            layout.extend(layer.tensors(i, offset));
            offset += layer.size();
        }

        layout
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let chunks = self.chunks(params)?;
        let mut layers = self.layers.iter_mut().zip(chunks);

        let Some((first, params)) = layers.next() else {
            return Err(MlErr::EmptyModel);
        };

        let mut a = first.forward(params, x)?;

        for (layer, params) in layers {
            a = layer.forward(params, a.view())?;
        }

        Ok(a)
    }

    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_len("model gradient", grad.len())?;
        let chunks = self.chunks(params)?;

        let mut rest = grad;
        let mut grad_chunks = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let (head, tail) = mem::take(&mut rest).split_at_mut(layer.size());
            grad_chunks.push(head);
            rest = tail;
        }

        for ((layer, params), grad) in self
            .layers
            .iter_mut()
            .zip(chunks)
            .zip(grad_chunks)
            .rev()
        {
            d = layer.backward(params, grad, d)?;
        }

        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::activations::ActFn;

    #[test]
    fn mismatched_widths_are_rejected() {
        let layers = [Layer::dense((2, 3), None), Layer::dense((2, 1), None)];
        assert!(Sequential::new(layers).is_err());
        assert!(matches!(Sequential::new(Vec::new()), Err(MlErr::EmptyModel)));
    }

    #[test]
    fn layout_names_every_tensor() {
        let model = Sequential::new([
            Layer::dense((2, 3), Some(ActFn::relu())),
            Layer::dense((3, 1), None),
        ])
        .unwrap();

        let names: Vec<_> = model.layout().into_iter().map(|t| t.name).collect();

        assert_eq!(model.size(), 9 + 4);
        assert_eq!(names, ["0.weight", "0.bias", "1.weight", "1.bias"]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut model = Sequential::new([
            Layer::dense((2, 2), Some(ActFn::sigmoid(1.))),
            Layer::dense((2, 1), None),
        ])
        .unwrap();

        let params = vec![0.1, -0.2, 0.3, 0.4, 0.05, -0.05, 0.7, -0.6, 0.2];
        let x = array![[0.5, -1.0]];

        // loss = sum(y), so the delta of the output is all ones.
        let mut grad = vec![0.0; params.len()];
        model.forward(&params, x.view()).unwrap();
        model.backward(&params, &mut grad, array![[1.0]]).unwrap();

        let eps = 1e-3;
        for i in 0..params.len() {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let f_plus = model.forward(&plus, x.view()).unwrap().sum();
            let f_minus = model.forward(&minus, x.view()).unwrap().sum();
            let numeric = (f_plus - f_minus) / (2. * eps);

            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}: {numeric} vs {}", grad[i]);
        }
    }
}
