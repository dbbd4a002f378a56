use std::fmt;

use serde::Serialize;

/// Which half of a participant's data a step runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => f.write_str("train"),
            Mode::Test => f.write_str("test"),
        }
    }
}

/// How the server side obtains `center_front` outputs for a step.
///
/// There is exactly one active mode per (participant, phase) pair, the orchestrator decides
/// it up front and every server-side call is checked against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Frozen segments run and their outputs are written into the activation cache.
    Populate,
    /// Outputs are read back from the activation cache by sample key.
    Cached,
    /// Every segment runs on every step, nothing is cached.
    Direct,
}

/// The stage of the run a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Populate,
    Train,
    Test,
    Merge,
    Personalize,
    Evaluate,
    Checkpoint,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Setup => "setup",
            Phase::Populate => "populate",
            Phase::Train => "train",
            Phase::Test => "test",
            Phase::Merge => "merge",
            Phase::Personalize => "personalize",
            Phase::Evaluate => "evaluate",
            Phase::Checkpoint => "checkpoint",
        };

        f.write_str(s)
    }
}
