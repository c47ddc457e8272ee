//! Command-line interface definitions.
//!
//! Provides CLI structure and output formatting:
//! - `Cli`, `Commands`: CLI argument definitions via clap
//! - `Display`: Formatted terminal output with colors and status
//! - `RecoveryMenu`: Operator-driven recovery

mod commands;
mod display;
mod interactive;

pub use commands::{
    Cli, Commands, ConfigAction, HealthAction, MonitorAction, OutputFormat, RecoverAction,
    RetryAction, StateAction,
};
pub use display::Display;
pub use interactive::{RecoveryChoice, RecoveryMenu};
