pub use crate::config::WorkerConfig;
pub use crate::error::*;
pub use crate::runner::WorkerRunner;
pub use crate::types::*;
