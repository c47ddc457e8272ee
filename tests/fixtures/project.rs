//! Temporary warden project wired to a scripted agent and quiet probes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use claude_warden::agent::AgentInvoker;
use claude_warden::config::{ProjectPaths, WardenConfig};
use claude_warden::health::{ResourceSnapshot, SystemProbe};
use claude_warden::state::{ExecutionState, Task};
use claude_warden::supervisor::{StopSignal, Warden};

/// Healthy host with working connectivity.
pub struct QuietProbe;

#[async_trait]
impl SystemProbe for QuietProbe {
    async fn resources(&self, _path: &Path) -> ResourceSnapshot {
        ResourceSnapshot {
            disk_usage_percent: Some(20.0),
            memory_usage_percent: Some(30.0),
            load_average: Some(0.2),
            cpu_count: 4,
        }
    }

    async fn reachable(&self, _target: &str, _timeout: Duration) -> bool {
        true
    }
}

/// Retries without backoff, short monitor interval, no notifications.
pub fn fast_config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.retry.base_delay_secs = 0;
    config.retry.max_delay_secs = 0;
    config.health.interval_secs = 2;
    config.health.probe_timeout_secs = 1;
    config.notification.enabled = false;
    config
}

pub struct TestProject {
    pub dir: TempDir,
    pub paths: ProjectPaths,
    pub config: WardenConfig,
}

impl TestProject {
    pub async fn new() -> Self {
        Self::with_config(fast_config()).await
    }

    pub async fn with_config(config: WardenConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let paths = ProjectPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().await.unwrap();
        config.save(&paths.warden_dir).await.unwrap();
        Self { dir, paths, config }
    }

    pub fn warden(&self, agent: Arc<dyn AgentInvoker>) -> Warden {
        Warden::assemble(
            self.paths.clone(),
            self.config.clone(),
            agent,
            Arc::new(QuietProbe),
            StopSignal::new(),
        )
        .unwrap()
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

pub fn three_tasks() -> ExecutionState {
    ExecutionState::new(vec![Task::new("T1"), Task::new("T2"), Task::new("T3")])
}
