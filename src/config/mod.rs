//! Configuration types and loading.
//!
//! `WardenConfig` is read from `.warden/config.toml`; every section falls back
//! to its defaults when absent. `ProjectPaths` derives all on-disk locations.

mod settings;

pub use settings::{
    AgentConfig, HealthConfig, NotificationConfig, ProjectPaths, RecoveryConfig, ReportConfig,
    RetryConfig, WARDEN_DIR, WardenConfig,
};
