//! Pipeline execution state.
//!
//! `ExecutionState` is the single document shared by every supervisor
//! component; `StateStore` owns it on disk.

mod machine;
mod model;
mod store;

pub use machine::{PipelineStatus, TaskStatus};
pub use model::{ExecutionState, RetryInfo, Task};
pub use store::StateStore;
