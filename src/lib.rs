pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod notification;
pub mod recovery;
pub mod report;
pub mod state;
pub mod supervisor;
pub mod utils;

pub use error::{Result, WardenError};
pub use health::{HealthCheckResult, HealthMonitor};
pub use recovery::{ErrorKind, RecoveryPointManager, RetryOutcome, RetryScheduler};
pub use state::{ExecutionState, StateStore};
pub use supervisor::{Supervisor, Warden};
