use std::{cell::RefCell, collections::HashMap, rc::Rc};

use machine_learning::{
    MlErr, Segment,
    arch::{Sequential, activations::ActFn, layers::Layer},
    initialization::{ChainedParamGen, ConstParamGen, ParamGen, RandParamGen},
};
use rand::rngs::StdRng;

use crate::{Result, SplitErr};

/// The four segments of a split network, in forward order.
pub struct SegmentSet {
    pub front: Segment,
    pub center_front: Segment,
    pub center_back: Segment,
    pub back: Segment,
}

impl SegmentSet {
    /// Checks that every segment feeds the next one and that the ends match the data.
    pub fn check(&self, x_size: usize, classes: usize) -> std::result::Result<(), String> {
        let chain = [
            ("input", x_size, &self.front),
            ("front", self.front.output_size(), &self.center_front),
            ("center_front", self.center_front.output_size(), &self.center_back),
            ("center_back", self.center_back.output_size(), &self.back),
        ];

        for (prev, width, next) in chain {
            if next.input_size() != width {
                return Err(format!(
                    "{} takes {} inputs but {prev} gives {width}",
                    next.name(),
                    next.input_size()
                ));
            }
        }

        if self.back.output_size() != classes {
            return Err(format!(
                "back gives {} outputs for {classes} classes",
                self.back.output_size()
            ));
        }

        Ok(())
    }
}

/// The data dimensions a configuration is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDims {
    pub x_size: usize,
    pub classes: usize,
}

type CtorResult<T> = std::result::Result<T, MlErr>;

/// Builds the segments of one configuration, drawing initial weights from `rng`.
pub type SegmentCtor = fn(SegmentDims, Rc<RefCell<StdRng>>) -> CtorResult<SegmentSet>;

/// Maps configuration names to segment constructors.
pub struct SegmentRegistry {
    ctors: HashMap<String, SegmentCtor>,
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("mlp_split1", mlp_split1);
        registry.register("mlp_split2", mlp_split2);
        registry
    }
}

impl SegmentRegistry {
    /// A registry with the builtin configurations.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, ctor: SegmentCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    /// Looks a configuration up, fails with `UnknownConfig` if it isn't registered.
    pub fn resolve(&self, name: &str) -> Result<SegmentCtor> {
        self.ctors
            .get(name)
            .copied()
            .ok_or_else(|| SplitErr::UnknownConfig(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.ctors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builds the segments of one participant and checks they fit together.
///
/// # Returns
/// `SegmentInit` naming the participant and the offending segment on failure.
pub fn build_segments(
    ctor: SegmentCtor,
    participant: &str,
    dims: SegmentDims,
    rng: Rc<RefCell<StdRng>>,
) -> Result<SegmentSet> {
    let set = ctor(dims, rng).map_err(|e| SplitErr::SegmentInit {
        participant: participant.to_string(),
        segment: "segments",
        detail: e.to_string(),
    })?;

    set.check(dims.x_size, dims.classes)
        .map_err(|detail| SplitErr::SegmentInit {
            participant: participant.to_string(),
            segment: "segments",
            detail,
        })?;

    Ok(set)
}

/// Xavier-uniform weights followed by zero biases for every layer of `dims`.
fn dense_gen(
    rng: &Rc<RefCell<StdRng>>,
    dims: &[(usize, usize)],
) -> CtorResult<Box<dyn ParamGen>> {
    let mut gens: Vec<Box<dyn ParamGen>> = Vec::with_capacity(dims.len() * 2);

    for &(n, m) in dims {
        gens.push(Box::new(RandParamGen::xavier_uniform(rng.clone(), n * m, n, m)?));
        gens.push(Box::new(ConstParamGen::new(0., m)));
    }

    Ok(Box::new(ChainedParamGen::new(gens)))
}

/// A dense segment, every layer but the last one followed by a ReLU.
fn dense_segment(
    name: &str,
    rng: &Rc<RefCell<StdRng>>,
    dims: &[(usize, usize)],
    last_act: Option<ActFn>,
) -> CtorResult<Segment> {
    let layers = dims.iter().enumerate().map(|(i, &dim)| {
        let act = if i + 1 == dims.len() {
            last_act.clone()
        } else {
            Some(ActFn::relu())
        };

        Layer::dense(dim, act)
    });

    let model = Sequential::new(layers)?;
    let mut param_gen = dense_gen(rng, dims)?;
    Segment::new(name, model, param_gen.as_mut())
}

/// One hidden layer per segment.
pub fn mlp_split1(
    dims: SegmentDims,
    rng: Rc<RefCell<StdRng>>,
) -> CtorResult<SegmentSet> {
    const HIDDEN: usize = 32;
    let relu = Some(ActFn::relu());

    Ok(SegmentSet {
        front: dense_segment("front", &rng, &[(dims.x_size, HIDDEN)], relu.clone())?,
        center_front: dense_segment("center_front", &rng, &[(HIDDEN, HIDDEN)], relu.clone())?,
        center_back: dense_segment("center_back", &rng, &[(HIDDEN, HIDDEN)], relu)?,
        back: dense_segment("back", &rng, &[(HIDDEN, dims.classes)], None)?,
    })
}

/// A deeper variant, with two layers in every segment but `center_front`.
pub fn mlp_split2(
    dims: SegmentDims,
    rng: Rc<RefCell<StdRng>>,
) -> CtorResult<SegmentSet> {
    let relu = Some(ActFn::relu());

    Ok(SegmentSet {
        front: dense_segment("front", &rng, &[(dims.x_size, 64), (64, 32)], relu.clone())?,
        center_front: dense_segment("center_front", &rng, &[(32, 32)], relu.clone())?,
        center_back: dense_segment("center_back", &rng, &[(32, 32), (32, 16)], relu)?,
        back: dense_segment("back", &rng, &[(16, 16), (16, dims.classes)], None)?,
    })
}
