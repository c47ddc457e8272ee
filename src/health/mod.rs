//! Periodic health checks over the pipeline and its host.
//!
//! Checks are pure functions in [`checks`]; [`HealthMonitor`] gathers inputs
//! (state, error log, probes, agent log) and turns serious findings naming a
//! task into [`SyntheticFailure`]s for the retry worker.

pub mod checks;
mod monitor;
mod probes;
mod types;

pub use monitor::{HealthMonitor, SyntheticFailure};
pub use probes::{HostProbe, SystemProbe};
pub use types::{
    Connectivity, Finding, FindingKind, HealthCheckResult, ResourceSnapshot, Severity,
};
