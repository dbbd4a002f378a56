use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;

use crate::mode::Phase;

/// The split learning engine's result type.
pub type Result<T> = std::result::Result<T, SplitErr>;

/// Every failure the engine can run into.
///
/// Structural errors point at a broken invariant and abort the run, transient ones only cost
/// the participant its current step (see `SplitErr::is_transient`).
#[derive(Debug)]
pub enum SplitErr {
    /// A key was consumed before its window populated it.
    KeyNotFound {
        key: u64,
    },
    /// Two states disagree on the shape of a tensor.
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// Merge was called with nothing to merge.
    EmptyInput,
    InvalidWeight {
        index: usize,
        weight: f64,
    },
    WeightCountMismatch {
        states: usize,
        weights: usize,
    },
    /// A batch tried to use the same key twice inside one window.
    KeyCollision {
        requested: usize,
        capacity: usize,
    },
    /// `backward` without a preceding `compute_loss`.
    NoPendingLoss {
        participant: String,
    },
    ModeViolation {
        participant: String,
        op: &'static str,
        mode: crate::mode::ExecMode,
    },
    NonFiniteLoss {
        participant: String,
    },
    PairingMismatch {
        participant: String,
        counterpart: String,
    },
    UnknownConfig(String),
    SegmentInit {
        participant: String,
        segment: &'static str,
        detail: String,
    },
    InvalidConfig(String),
    Ml(MlErr),
    Io(io::Error),
    Json(serde_json::Error),
    Checkpoint {
        path: PathBuf,
        detail: String,
    },
    /// A fatal error, tagged with where in the run it surfaced.
    Run {
        phase: Phase,
        epoch: usize,
        participant: Option<String>,
        source: Box<SplitErr>,
    },
}

impl SplitErr {
    /// Whether the error only affects the current step of one participant.
    pub fn is_transient(&self) -> bool {
        matches!(self, SplitErr::NonFiniteLoss { .. })
    }

    /// Tags a fatal error with the phase, epoch and participant it happened in.
    pub fn during(self, phase: Phase, epoch: usize, participant: Option<&str>) -> Self {
        if let SplitErr::Run { .. } = self {
            return self;
        }

        SplitErr::Run {
            phase,
            epoch,
            participant: participant.map(str::to_string),
            source: Box::new(self),
        }
    }
}

impl fmt::Display for SplitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitErr::KeyNotFound { key } => {
                write!(f, "key {key} was never populated in the current window")
            }
            SplitErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {name}: got {got:?}, expected {expected:?}"
            ),
            SplitErr::EmptyInput => write!(f, "nothing to merge: no states or all-zero weights"),
            SplitErr::InvalidWeight { index, weight } => {
                write!(f, "merge weight {index} is invalid: {weight}")
            }
            SplitErr::WeightCountMismatch { states, weights } => {
                write!(f, "got {states} states but {weights} weights")
            }
            SplitErr::KeyCollision {
                requested,
                capacity,
            } => write!(
                f,
                "a batch of {requested} keys would reuse keys of a window of {capacity}"
            ),
            SplitErr::NoPendingLoss { participant } => {
                write!(f, "participant {participant} called backward without a loss")
            }
            SplitErr::ModeViolation {
                participant,
                op,
                mode,
            } => write!(f, "{op} is not allowed in {mode:?} mode for {participant}"),
            SplitErr::NonFiniteLoss { participant } => {
                write!(f, "participant {participant} produced a non-finite loss")
            }
            SplitErr::PairingMismatch {
                participant,
                counterpart,
            } => write!(
                f,
                "participant {participant} is paired with server counterpart {counterpart}"
            ),
            SplitErr::UnknownConfig(name) => write!(f, "unknown segment configuration {name}"),
            SplitErr::SegmentInit {
                participant,
                segment,
                detail,
            } => write!(
                f,
                "failed to initialize {segment} for participant {participant}: {detail}"
            ),
            SplitErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            SplitErr::Ml(e) => write!(f, "ml error: {e}"),
            SplitErr::Io(e) => write!(f, "io error: {e}"),
            SplitErr::Json(e) => write!(f, "json error: {e}"),
            SplitErr::Checkpoint { path, detail } => {
                write!(f, "checkpoint {}: {detail}", path.display())
            }
            SplitErr::Run {
                phase,
                epoch,
                participant: Some(participant),
                source,
            } => write!(
                f,
                "{phase} failed at epoch {epoch} for participant {participant}: {source}"
            ),
            SplitErr::Run {
                phase,
                epoch,
                participant: None,
                source,
            } => write!(f, "{phase} failed at epoch {epoch}: {source}"),
        }
    }
}

impl Error for SplitErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SplitErr::Ml(e) => Some(e),
            SplitErr::Io(e) => Some(e),
            SplitErr::Json(e) => Some(e),
            SplitErr::Run { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<MlErr> for SplitErr {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::ShapeMismatch {
                name,
                got,
                expected,
            } => SplitErr::ShapeMismatch {
                name,
                got,
                expected,
            },
            other => SplitErr::Ml(other),
        }
    }
}

impl From<io::Error> for SplitErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SplitErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
