use super::{Relu, Sigmoid};

/// The activation applied after a layer's affine transform.
#[derive(Clone, Debug)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu(Relu),
}

impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.f(x),
            ActFn::Relu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.df(x),
            ActFn::Relu(a) => a.df(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_clamps_negatives_and_gates_its_derivative() {
        let act = ActFn::relu();

        assert_eq!(act.f(-2.), 0.);
        assert_eq!(act.f(3.), 3.);
        assert_eq!(act.df(-2.), 0.);
        assert_eq!(act.df(3.), 1.);
    }
}
