//! The long-running supervisor.
//!
//! - `Warden`: all components of one project wired together
//! - `Supervisor`: health monitor loop feeding a single retry worker
//! - `SupervisorLock`: one supervisor per project (pid + heartbeat lock file)
//! - `StopSignal`: Ctrl-C / SIGTERM / `monitor stop` cancellation

mod context;
mod daemon;
mod engine;
mod lock;
mod signal;

pub use context::Warden;
pub use daemon::spawn_daemon;
pub use engine::{AutoRecovery, CycleOutcome, MonitorMode, RetryJob, Supervisor};
pub use lock::{LockGuard, LockInfo, SupervisorLock};
pub use signal::StopSignal;
