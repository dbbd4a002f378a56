use std::collections::{BTreeMap, btree_map};

use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::{MlErr, Result};

/// Where a named tensor lives inside a model's flat parameter slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl TensorSpec {
    pub fn new(name: String, shape: Vec<usize>, offset: usize) -> Self {
        Self {
            name,
            shape,
            offset,
        }
    }

    /// The amount of scalars in this tensor.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A snapshot of a segment's parameters, keyed by tensor name.
///
/// Names iterate in lexical order so that anything folding over a state does it in a fixed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamState {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ParamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the tensors described by `layout` out of a flat parameter slice.
    ///
    /// # Arguments
    /// * `layout` - The named tensors inside `params`.
    /// * `params` - The flat parameter slice.
    ///
    /// # Returns
    /// The snapshot, or an error if the layout points outside of `params`.
    pub fn from_flat(layout: &[TensorSpec], params: &[f32]) -> Result<Self> {
        let mut state = Self::new();

        for spec in layout {
            let end = spec.offset + spec.len();
            let raw = params.get(spec.offset..end).ok_or(MlErr::SizeMismatch {
                what: "parameter slice",
                got: params.len(),
                expected: end,
            })?;

            let tensor = ArrayViewD::from_shape(IxDyn(&spec.shape), raw)
                .map_err(|_| MlErr::SizeMismatch {
                    what: "tensor layout",
                    got: raw.len(),
                    expected: spec.len(),
                })?
                .to_owned();

            state.insert(spec.name.clone(), tensor);
        }

        Ok(state)
    }

    /// Writes this snapshot into a flat parameter slice.
    ///
    /// Every tensor is validated before anything is written, a failing call leaves `params`
    /// untouched.
    pub fn write_flat(&self, layout: &[TensorSpec], params: &mut [f32]) -> Result<()> {
        for spec in layout {
            let tensor = self.get(&spec.name).ok_or_else(|| MlErr::MissingTensor {
                name: spec.name.clone(),
            })?;

            if tensor.shape() != spec.shape.as_slice() {
                return Err(MlErr::ShapeMismatch {
                    name: spec.name.clone(),
                    got: tensor.shape().to_vec(),
                    expected: spec.shape.clone(),
                });
            }

            if spec.offset + spec.len() > params.len() {
                return Err(MlErr::SizeMismatch {
                    what: "parameter slice",
                    got: params.len(),
                    expected: spec.offset + spec.len(),
                });
            }
        }

        for spec in layout {
            let tensor = &self.tensors[&spec.name];
            let dst = &mut params[spec.offset..spec.offset + spec.len()];

            for (p, &v) in dst.iter_mut().zip(tensor.iter()) {
                *p = v;
            }
        }

        Ok(())
    }

    pub fn insert(&mut self, name: String, tensor: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.tensors.insert(name, tensor)
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ArrayD<f32>> {
        self.tensors.iter()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl FromIterator<(String, ArrayD<f32>)> for ParamState {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}
