use super::ParamGen;

/// Fills a fixed amount of parameters with a single value, typically a layer's biases.
pub struct ConstParamGen {
    value: f32,
    left: usize,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen` yielding `value` exactly `count` times.
    pub fn new(value: f32, count: usize) -> Self {
        Self { value, left: count }
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let take = n.min(self.left);
        if take == 0 {
            return None;
        }

        self.left -= take;
        Some(vec![self.value; take])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_up_to_its_count() {
        let mut biases = ConstParamGen::new(0.5, 4);

        assert_eq!(biases.sample(3), Some(vec![0.5; 3]));
        assert_eq!(biases.sample(3), Some(vec![0.5]));
        assert_eq!(biases.sample(1), None);
    }

    #[test]
    fn zero_count_is_exhausted_from_the_start() {
        assert_eq!(ConstParamGen::new(0., 0).sample(2), None);
    }
}
