pub mod arch;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod optimization;
pub mod segment;
pub mod state;

pub use error::{MlErr, Result};
pub use segment::Segment;
pub use state::{ParamState, TensorSpec};
