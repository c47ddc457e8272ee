use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("State document is corrupt ({path}): {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("State not initialized. Run 'claude-warden state init' first.")]
    StateNotInitialized,

    #[error("State already exists at {0}. Use --force to overwrite.")]
    StateAlreadyExists(PathBuf),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition for {task_id}: {from} → {to}")]
    InvalidTaskTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Recovery point not found: {0}")]
    RecoveryPointNotFound(String),

    #[error("Recovery point {id} is corrupt: {reason}")]
    CorruptRecoveryPoint { id: String, reason: String },

    #[error("No recovery point available")]
    NoRecoveryPoint,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Agent command not found: {0}")]
    AgentNotFound(String),

    #[error("Agent execution failed: {0}")]
    Agent(String),

    #[error("Operation aborted by stop signal")]
    Aborted,

    #[error("Supervisor already running (PID: {pid}). Use 'monitor stop' first.")]
    DaemonAlreadyRunning { pid: u32 },

    #[error("Failed to acquire supervisor lock: {0}")]
    LockAcquisitionFailed(String),

    #[error("Project not initialized. Run 'claude-warden init' first.")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl WardenError {
    /// Errors that leave the pipeline unusable until an operator restores a
    /// recovery point.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CorruptState { .. } | Self::StateNotInitialized)
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_state_is_fatal() {
        let err = WardenError::CorruptState {
            path: PathBuf::from("/tmp/state.json"),
            reason: "expected value at line 1".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/tmp/state.json"));
    }

    #[test]
    fn test_transient_errors_not_fatal() {
        assert!(!WardenError::Aborted.is_fatal());
        assert!(!WardenError::TaskNotFound("T1".into()).is_fatal());
    }
}
