use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::signal::StopSignal;
use crate::agent::{AgentInvoker, ClaudeCliInvoker, PromptBuilder};
use crate::config::{ProjectPaths, WardenConfig};
use crate::error::{Result, WardenError};
use crate::health::{HealthMonitor, HostProbe, SystemProbe};
use crate::notification::Alerter;
use crate::recovery::{ErrorLog, RecoveryPointManager, RetryScheduler};
use crate::report::Reporter;
use crate::state::StateStore;

/// Every component of one project, wired over the same state store.
pub struct Warden {
    pub paths: ProjectPaths,
    pub config: WardenConfig,
    pub store: StateStore,
    pub recovery: Arc<RecoveryPointManager>,
    pub error_log: ErrorLog,
    pub alerter: Alerter,
    pub prompts: PromptBuilder,
    pub agent: Arc<dyn AgentInvoker>,
    pub scheduler: Arc<RetryScheduler>,
    pub monitor: Arc<HealthMonitor>,
    pub reporter: Arc<Reporter>,
    pub stop: StopSignal,
}

impl Warden {
    /// Load config from an initialized project and wire the real agent CLI and
    /// host probes.
    pub async fn open(root: PathBuf) -> Result<Self> {
        let paths = ProjectPaths::new(root);
        if !paths.is_initialized() {
            return Err(WardenError::NotInitialized);
        }
        let config = WardenConfig::load(&paths.warden_dir).await?;
        paths.ensure_dirs().await?;

        let agent = Arc::new(ClaudeCliInvoker::new(
            config.agent.clone(),
            &paths.root,
            &paths.state_file,
            paths.agent_log(),
        ));
        Self::assemble(paths, config, agent, Arc::new(HostProbe), StopSignal::new())
    }

    pub fn assemble(
        paths: ProjectPaths,
        config: WardenConfig,
        agent: Arc<dyn AgentInvoker>,
        probe: Arc<dyn SystemProbe>,
        stop: StopSignal,
    ) -> Result<Self> {
        let store = StateStore::open(&paths.state_file)?;
        let recovery = Arc::new(RecoveryPointManager::new(
            &paths.recovery_dir,
            store.clone(),
            config.recovery.max_recovery_points,
        ));
        let error_log = ErrorLog::new(paths.error_log());
        let alerter = Alerter::for_project(&paths, &config.report, &config.notification);
        let prompts = PromptBuilder::new(paths.state_file.display().to_string());

        let scheduler = Arc::new(RetryScheduler::new(
            config.retry.clone(),
            store.clone(),
            Arc::clone(&recovery),
            Arc::clone(&agent),
            prompts.clone(),
            error_log.clone(),
            alerter.clone(),
            stop.subscribe(),
        ));

        let monitor = Arc::new(HealthMonitor::new(
            config.health.clone(),
            &paths.root,
            paths.agent_log(),
            store.clone(),
            error_log.clone(),
            probe,
        ));

        let reporter = Arc::new(Reporter::new(
            paths.clone(),
            config.report.clone(),
            config.health.log_tail_lines,
            alerter.history().clone(),
        ));

        debug!(root = %paths.root.display(), "Warden components assembled");
        Ok(Self {
            paths,
            config,
            store,
            recovery,
            error_log,
            alerter,
            prompts,
            agent,
            scheduler,
            monitor,
            reporter,
            stop,
        })
    }
}
