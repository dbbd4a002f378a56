pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod keys;
pub mod merge;
pub mod metrics;
pub mod mode;
pub mod orchestrator;
pub mod participant;
pub mod registry;
pub mod server;
pub mod sink;

pub use error::{Result, SplitErr};
pub use mode::{ExecMode, Mode, Phase};
pub use orchestrator::{Orchestrator, RunSummary};
