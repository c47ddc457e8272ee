use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::context::Warden;
use crate::agent::AgentOutput;
use crate::error::{Result, WardenError};
use crate::health::{
    FindingKind, HealthCheckResult, HealthMonitor, Severity, SyntheticFailure,
};
use crate::notification::{Alert, AlertKind};
use crate::recovery::{ErrorKind, ErrorLogEntry, RetryCandidate, RetryOutcome, RetryScheduler};
use crate::state::{PipelineStatus, TaskStatus};

const RETRY_QUEUE_CAPACITY: usize = 32;
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What a monitor loop does with its findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// Forward failures to the retry worker and recover corrupt state.
    Supervise,
    /// Record, alert and report only.
    Observe,
}

/// One unit of work for the retry worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryJob {
    pub task_id: String,
    pub kind: ErrorKind,
    pub error: String,
}

impl From<RetryCandidate> for RetryJob {
    fn from(candidate: RetryCandidate) -> Self {
        Self {
            task_id: candidate.task_id,
            kind: candidate.kind,
            error: candidate.error,
        }
    }
}

impl From<SyntheticFailure> for RetryJob {
    fn from(failure: SyntheticFailure) -> Self {
        Self {
            task_id: failure.task_id,
            kind: failure.kind,
            error: failure.message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub result: HealthCheckResult,
    pub forwarded: Vec<RetryJob>,
    pub restored_from: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AutoRecovery {
    pub restored_from: Option<String>,
    pub outcomes: Vec<(String, RetryOutcome)>,
}

/// Health monitor loop plus a single retry worker. The two only share the
/// state store and the in-flight set.
pub struct Supervisor {
    warden: Arc<Warden>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    alerted: Mutex<HashSet<(FindingKind, Option<String>)>>,
    /// Tasks whose exhausted ceiling has already been recorded.
    exhausted: Mutex<HashSet<String>>,
}

impl Supervisor {
    pub fn new(warden: Arc<Warden>) -> Self {
        Self {
            warden,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            alerted: Mutex::new(HashSet::new()),
            exhausted: Mutex::new(HashSet::new()),
        }
    }

    pub fn warden(&self) -> &Warden {
        &self.warden
    }

    /// Loop until the stop signal fires or state corruption cannot be
    /// repaired. `on_cycle` sees every cycle's outcome.
    pub async fn run<F>(&self, mode: MonitorMode, mut on_cycle: F) -> Result<()>
    where
        F: FnMut(&CycleOutcome),
    {
        let mut stop = self.warden.stop.subscribe();
        if *stop.borrow() {
            return Ok(());
        }

        let (tx, worker) = match mode {
            MonitorMode::Supervise => {
                let (tx, rx) = mpsc::channel(RETRY_QUEUE_CAPACITY);
                let handle = tokio::spawn(retry_worker(
                    Arc::clone(&self.warden.scheduler),
                    rx,
                    Arc::clone(&self.in_flight),
                ));
                (Some(tx), Some(handle))
            }
            MonitorMode::Observe => (None, None),
        };

        let mut ticker = tokio::time::interval(self.warden.monitor.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            ?mode,
            interval_secs = self.warden.monitor.interval().as_secs(),
            "Supervisor started"
        );
        self.warden
            .alerter
            .raise(Alert::new(
                AlertKind::Supervisor,
                Severity::Low,
                format!("Supervisor started ({:?})", mode),
            ))
            .await;

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle(mode, tx.as_ref()).await {
                        Ok(outcome) => on_cycle(&outcome),
                        Err(e) => {
                            error!(error = %e, "Supervisor halted");
                            break Err(e);
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break Ok(());
                    }
                }
            }
        };

        drop(tx);
        if let Some(mut handle) = worker {
            tokio::select! {
                _ = &mut handle => {}
                _ = tokio::time::sleep(WORKER_SHUTDOWN_GRACE) => {
                    warn!("Retry worker still busy, aborting it");
                    handle.abort();
                }
            }
        }

        if let Err(e) = &result {
            self.warden
                .alerter
                .raise(
                    Alert::new(
                        AlertKind::Supervisor,
                        Severity::Critical,
                        format!("Supervisor halted: {}", e),
                    )
                    .with_manual_options(),
                )
                .await;
        }
        info!("Supervisor stopped");
        result
    }

    /// One monitor cycle: check, react, report.
    pub async fn run_cycle(
        &self,
        mode: MonitorMode,
        retries: Option<&mpsc::Sender<RetryJob>>,
    ) -> Result<CycleOutcome> {
        let result = self.warden.monitor.check_once().await;
        let mut outcome = CycleOutcome {
            result,
            forwarded: Vec::new(),
            restored_from: None,
        };

        if outcome.result.has(FindingKind::StateCorrupt) && mode == MonitorMode::Supervise {
            outcome.restored_from = Some(self.recover_corrupt_state().await?);
        }

        self.escalate_fatal_patterns(&outcome.result).await;
        self.alert_new_findings(&outcome.result).await;

        if let Some(tx) = retries
            && self.warden.config.health.auto_retry
            && outcome.restored_from.is_none()
        {
            for failure in HealthMonitor::synthetic_failures(&outcome.result) {
                if let Some(job) = self.forward_synthetic(failure, tx).await {
                    outcome.forwarded.push(job);
                }
            }
            outcome.forwarded.extend(self.sweep_failed_tasks(tx).await);
        }

        let state = self.warden.store.read();
        let report = self
            .warden
            .reporter
            .build_status(outcome.result.clone(), &state);
        if let Err(e) = self.warden.reporter.write_status(&report).await {
            warn!(error = %e, "Failed to write status report");
        }

        debug!(
            findings = outcome.result.findings.len(),
            forwarded = outcome.forwarded.len(),
            "Monitor cycle complete"
        );
        Ok(outcome)
    }

    /// Restore the newest valid recovery point over a corrupt state file.
    /// Without one, raise a critical alert and fail so the loop halts.
    pub async fn recover_corrupt_state(&self) -> Result<String> {
        match self.warden.recovery.restore_latest_valid().await {
            Ok((id, _)) => {
                self.warden
                    .alerter
                    .raise(Alert::new(
                        AlertKind::RecoveryRestored,
                        Severity::High,
                        format!("State file was corrupt; restored recovery point {}", id),
                    ))
                    .await;
                Ok(id)
            }
            Err(e) => {
                self.warden
                    .alerter
                    .raise(
                        Alert::new(
                            AlertKind::StateCorrupt,
                            Severity::Critical,
                            format!(
                                "State file corrupt and automatic restore failed ({}). \
                                 Supervisor halted; repair {} or re-initialize with `claude-warden state init --force`",
                                e,
                                self.warden.paths.state_file.display()
                            ),
                        )
                        .with_manual_options(),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn escalate_fatal_patterns(&self, result: &HealthCheckResult) {
        for finding in result
            .findings
            .iter()
            .filter(|f| f.kind == FindingKind::FatalPattern)
        {
            if let Some(task_id) = &finding.task_id {
                let reason = finding.message.clone();
                let blocked = self.warden.store.update(|state| {
                    if let Some(task) = state.task(task_id)
                        && task.status != TaskStatus::Blocked
                        && task.status.can_transition_to(TaskStatus::Blocked)
                    {
                        state.block_task(task_id, &reason)?;
                    }
                    Ok(())
                });
                if let Err(e) = blocked {
                    warn!(task_id = %task_id, error = %e, "Failed to block task after fatal pattern");
                }
            }
            self.warden.alerter.raise(Alert::from_finding(finding)).await;
        }
    }

    /// Alert on medium and above findings the first time they appear. Fatal
    /// patterns and corruption are alerted by their own handlers.
    async fn alert_new_findings(&self, result: &HealthCheckResult) {
        let current: HashSet<(FindingKind, Option<String>)> = result
            .findings
            .iter()
            .filter(|f| f.severity >= Severity::Medium)
            .filter(|f| !matches!(f.kind, FindingKind::FatalPattern | FindingKind::StateCorrupt))
            .map(|f| (f.kind, f.task_id.clone()))
            .collect();

        let fresh: Vec<_> = {
            let mut alerted = self.alerted.lock();
            alerted.retain(|key| current.contains(key));
            current
                .iter()
                .filter(|key| alerted.insert((*key).clone()))
                .cloned()
                .collect()
        };

        for finding in result
            .findings
            .iter()
            .filter(|f| fresh.contains(&(f.kind, f.task_id.clone())))
        {
            self.warden.alerter.raise(Alert::from_finding(finding)).await;
        }
    }

    /// Mark the task failed, log the synthetic failure and queue it. Skipped
    /// when the task is already queued or being retried.
    async fn forward_synthetic(
        &self,
        failure: SyntheticFailure,
        tx: &mpsc::Sender<RetryJob>,
    ) -> Option<RetryJob> {
        if !self.in_flight.lock().insert(failure.task_id.clone()) {
            debug!(task_id = %failure.task_id, "Retry already in flight");
            return None;
        }

        let marked = self.warden.store.update(|state| {
            if state
                .task(&failure.task_id)
                .is_some_and(|t| t.status == TaskStatus::InProgress)
            {
                state.fail_task(&failure.task_id, &failure.message, Utc::now())?;
            }
            Ok(())
        });
        if let Err(e) = marked {
            warn!(task_id = %failure.task_id, error = %e, "Failed to mark task failed");
        }

        if let Err(e) = self.warden.error_log.append(&ErrorLogEntry::new(
            &failure.task_id,
            failure.kind,
            &failure.message,
        )) {
            warn!(error = %e, "Failed to append error log");
        }

        info!(
            task_id = %failure.task_id,
            kind = %failure.kind,
            source = %failure.source,
            "Forwarding synthetic failure"
        );
        self.enqueue(RetryJob::from(failure), tx).await
    }

    /// Queue failed tasks the retry policy would accept, and once per task
    /// those it now refuses for a ceiling.
    async fn sweep_failed_tasks(&self, tx: &mpsc::Sender<RetryJob>) -> Vec<RetryJob> {
        let candidates = match self.warden.scheduler.retry_candidates() {
            Ok(c) => c,
            Err(WardenError::StateNotInitialized) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to list retry candidates");
                return Vec::new();
            }
        };

        let mut queued = Vec::new();
        for candidate in self.unreported(candidates) {
            if !self.in_flight.lock().insert(candidate.task_id.clone()) {
                continue;
            }
            if let Some(job) = self.enqueue(RetryJob::from(candidate), tx).await {
                queued.push(job);
            }
        }
        queued
    }

    /// Drops exhausted candidates whose refusal was already recorded. A task
    /// leaving the exhausted list (reset, restored) is forgotten.
    fn unreported(&self, candidates: Vec<RetryCandidate>) -> Vec<RetryCandidate> {
        let mut exhausted = self.exhausted.lock();
        exhausted.retain(|id| {
            candidates
                .iter()
                .any(|c| c.exhausted.is_some() && &c.task_id == id)
        });
        candidates
            .into_iter()
            .filter(|c| match &c.exhausted {
                None => true,
                Some(reason) => {
                    let fresh = exhausted.insert(c.task_id.clone());
                    if fresh {
                        info!(task_id = %c.task_id, %reason, "Recording exhausted retry ceiling");
                    }
                    fresh
                }
            })
            .collect()
    }

    async fn enqueue(&self, job: RetryJob, tx: &mpsc::Sender<RetryJob>) -> Option<RetryJob> {
        match tx.send(job.clone()).await {
            Ok(()) => Some(job),
            Err(_) => {
                warn!(task_id = %job.task_id, "Retry worker gone, dropping job");
                self.in_flight.lock().remove(&job.task_id);
                None
            }
        }
    }

    /// `retry monitor`: retry failed tasks on every tick, one at a time,
    /// without health checks.
    pub async fn run_retry_monitor<F>(&self, mut on_outcome: F) -> Result<()>
    where
        F: FnMut(&str, &RetryOutcome),
    {
        let mut stop = self.warden.stop.subscribe();
        let mut ticker = tokio::time::interval(self.warden.monitor.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let candidates = match self.warden.scheduler.retry_candidates() {
                        Ok(c) => c,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(error = %e, "Failed to list retry candidates");
                            continue;
                        }
                    };
                    for job in self.unreported(candidates).into_iter().map(RetryJob::from) {
                        match self.warden.scheduler.attempt_retry(&job.task_id, job.kind, &job.error).await {
                            Ok(outcome) => on_outcome(&job.task_id, &outcome),
                            Err(WardenError::Aborted) => return Ok(()),
                            Err(e) => warn!(task_id = %job.task_id, error = %e, "Retry attempt errored"),
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// `recover auto`: repair corrupt state, then retry every eligible failed
    /// task once. Tasks past a ceiling come back as refusals.
    pub async fn auto_recover(&self) -> Result<AutoRecovery> {
        let mut report = AutoRecovery::default();

        match self.warden.store.read() {
            Ok(_) => {}
            Err(WardenError::CorruptState { .. }) => {
                report.restored_from = Some(self.recover_corrupt_state().await?);
            }
            Err(e) => return Err(e),
        }

        for job in self
            .warden
            .scheduler
            .retry_candidates()?
            .into_iter()
            .map(RetryJob::from)
        {
            let outcome = self
                .warden
                .scheduler
                .attempt_retry(&job.task_id, job.kind, &job.error)
                .await?;
            report.outcomes.push((job.task_id, outcome));
        }

        Ok(report)
    }

    /// `recover continue`: hand a task back to the agent with a continuation
    /// instruction. Manual continuation does not consume retry budget.
    pub async fn continue_task(&self, task_id: Option<&str>) -> Result<(String, AgentOutput)> {
        let state = self.warden.store.read()?;
        let task_id = match task_id {
            Some(id) => state.require_task(id)?.id.clone(),
            None => state
                .implied_task()
                .map(|t| t.id.clone())
                .ok_or_else(|| WardenError::Other("no task left to continue".to_string()))?,
        };

        if let Err(e) = self
            .warden
            .recovery
            .create(Some(&task_id), "before manual continue")
            .await
        {
            warn!(task_id = %task_id, error = %e, "Failed to create recovery point");
        }

        let state = self.warden.store.update(|state| {
            state.start_task(&task_id, Utc::now())?;
            state.status = PipelineStatus::Continuing;
            Ok(())
        })?;
        let task = state.require_task(&task_id)?;
        let instruction = self.warden.prompts.build_continue_instruction(&state, task);

        info!(task_id = %task_id, "Continuing task");
        let output = self.warden.agent.invoke(&task_id, &instruction).await?;

        if output.success {
            self.warden
                .store
                .update(|state| state.complete_task(&task_id, Utc::now()))?;
        } else {
            let text = output.error_text();
            let kind = crate::recovery::classify_exit(output.exit_code, &text);
            self.warden.store.update(|state| {
                state.fail_task(&task_id, &text, Utc::now())?;
                if !state.status.is_terminal() {
                    state.status = PipelineStatus::Running;
                }
                Ok(())
            })?;
            if let Err(e) = self
                .warden
                .error_log
                .append(&ErrorLogEntry::new(&task_id, kind, &text))
            {
                warn!(error = %e, "Failed to append error log");
            }
        }

        Ok((task_id, output))
    }
}

async fn retry_worker(
    scheduler: Arc<RetryScheduler>,
    mut rx: mpsc::Receiver<RetryJob>,
    in_flight: Arc<Mutex<HashSet<String>>>,
) {
    while let Some(job) = rx.recv().await {
        let outcome = scheduler
            .attempt_retry(&job.task_id, job.kind, &job.error)
            .await;
        in_flight.lock().remove(&job.task_id);

        match outcome {
            Ok(outcome) => info!(task_id = %job.task_id, outcome = %outcome, "Retry finished"),
            Err(WardenError::Aborted) => {
                info!("Retry worker stopping");
                break;
            }
            Err(e) => error!(task_id = %job.task_id, error = %e, "Retry attempt errored"),
        }
    }
}
