use std::{
    error::Error,
    fmt::{self, Display},
};

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingTensor {
        name: String,
    },
    EmptyModel,
    FrozenSegment {
        segment: String,
    },
    ParamGenExhausted {
        segment: String,
        got: usize,
        expected: usize,
    },
    InvalidDistribution(RandErr),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "The tensor {name} has shape {got:?} but {expected:?} was expected"
            ),
            MlErr::MissingTensor { name } => {
                write!(f, "The parameter state is missing the tensor {name}")
            }
            MlErr::EmptyModel => write!(f, "A model must have at least one layer"),
            MlErr::FrozenSegment { segment } => {
                write!(f, "Tried to train the frozen segment {segment}")
            }
            MlErr::ParamGenExhausted {
                segment,
                got,
                expected,
            } => write!(
                f,
                "The parameter generator for {segment} was exhausted after {got} of {expected} parameters"
            ),
            MlErr::InvalidDistribution(e) => write!(f, "Invalid parameter distribution: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::InvalidDistribution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::InvalidDistribution(value)
    }
}
