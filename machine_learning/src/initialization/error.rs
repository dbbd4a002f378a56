use std::{error::Error, fmt};

use rand_distr::{NormalError, uniform::Error as UniformError};

pub type Result<T> = std::result::Result<T, RandErr>;

/// A `RandParamGen` distribution that couldn't be built from its parameters.
#[derive(Debug)]
pub enum RandErr {
    Normal(NormalError),
    Uniform(UniformError),
}

impl From<NormalError> for RandErr {
    fn from(value: NormalError) -> Self {
        Self::Normal(value)
    }
}

impl From<UniformError> for RandErr {
    fn from(value: UniformError) -> Self {
        Self::Uniform(value)
    }
}

impl fmt::Display for RandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandErr::Normal(e) => write!(f, "normal distribution: {e}"),
            RandErr::Uniform(e) => write!(f, "uniform distribution: {e}"),
        }
    }
}

impl Error for RandErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RandErr::Normal(e) => Some(e),
            RandErr::Uniform(e) => Some(e),
        }
    }
}
