//! Recovery points: immutable full-state snapshots stored beside, not inside,
//! the live state document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{Result, WardenError};
use crate::state::{ExecutionState, PipelineStatus, StateStore};
use crate::utils::write_atomic_async;

const ID_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const BACKUP_DIR: &str = "pre-recovery";
const BACKUP_PREFIX: &str = "pre-recovery_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPoint {
    pub id: String,
    #[serde(default)]
    pub associated_task_id: Option<String>,
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub state_snapshot: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPointSummary {
    pub id: String,
    pub associated_task_id: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub status: PipelineStatus,
    pub completed_tasks: usize,
    pub total_tasks: usize,
}

impl From<&RecoveryPoint> for RecoveryPointSummary {
    fn from(point: &RecoveryPoint) -> Self {
        Self {
            id: point.id.clone(),
            associated_task_id: point.associated_task_id.clone(),
            reason: point.reason.clone(),
            created_at: point.created_at,
            status: point.state_snapshot.status,
            completed_tasks: point.state_snapshot.completed_tasks,
            total_tasks: point.state_snapshot.total_tasks,
        }
    }
}

fn format_id(ts: DateTime<Utc>) -> String {
    ts.format(ID_FORMAT).to_string()
}

fn parse_id(id: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(id, ID_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        && !id.starts_with('.')
}

pub struct RecoveryPointManager {
    dir: PathBuf,
    store: StateStore,
    max_retained: usize,
    last_issued: Mutex<Option<DateTime<Utc>>>,
}

impl RecoveryPointManager {
    pub fn new(dir: impl AsRef<Path>, store: StateStore, max_retained: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            store,
            max_retained: max_retained.max(1),
            last_issued: Mutex::new(None),
        }
    }

    fn point_file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn note_file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    /// Point ids on disk, newest first. Uses filename order only.
    async fn ids_newest_first(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut ids: Vec<String> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(name) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(name.to_string());
            }
        }

        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Strictly increasing id even when the clock stalls or several points are
    /// created within the same microsecond.
    async fn next_id(&self) -> Result<String> {
        let newest_on_disk = self
            .ids_newest_first()
            .await?
            .first()
            .and_then(|id| parse_id(id));

        let mut last = self.last_issued.lock();
        let floor = match (*last, newest_on_disk) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let mut ts = Utc::now().trunc_subsecs(6);
        if let Some(floor) = floor
            && ts <= floor
        {
            ts = floor + Duration::microseconds(1);
        }
        *last = Some(ts);
        Ok(format_id(ts))
    }

    /// Snapshot the live state verbatim. Never mutates state.
    pub async fn create(&self, task_id: Option<&str>, reason: &str) -> Result<RecoveryPoint> {
        let snapshot = self.store.read()?;
        fs::create_dir_all(&self.dir).await?;

        let id = self.next_id().await?;
        let point = RecoveryPoint {
            id: id.clone(),
            associated_task_id: task_id.map(str::to_string),
            reason: reason.to_string(),
            created_at: Utc::now(),
            state_snapshot: snapshot,
        };

        let json = serde_json::to_vec_pretty(&point)?;
        write_atomic_async(&self.point_file(&id), &json).await?;
        write_atomic_async(&self.note_file(&id), render_note(&point).as_bytes()).await?;

        info!(
            recovery_point = %id,
            task_id = task_id.unwrap_or("-"),
            reason,
            "Recovery point created"
        );

        self.prune(self.max_retained).await?;
        Ok(point)
    }

    pub async fn load(&self, id: &str) -> Result<RecoveryPoint> {
        if !is_valid_id(id) {
            return Err(WardenError::RecoveryPointNotFound(id.to_string()));
        }
        let file = self.point_file(id);
        let content = match fs::read_to_string(&file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WardenError::RecoveryPointNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| WardenError::CorruptRecoveryPoint {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Summaries, newest first. Unreadable points are skipped.
    pub async fn list(&self, limit: usize) -> Result<Vec<RecoveryPointSummary>> {
        let mut summaries = Vec::new();
        for id in self.ids_newest_first().await? {
            if summaries.len() >= limit {
                break;
            }
            match self.load(&id).await {
                Ok(point) => summaries.push(RecoveryPointSummary::from(&point)),
                Err(e) => warn!(recovery_point = %id, error = %e, "Skipping unreadable recovery point"),
            }
        }
        Ok(summaries)
    }

    pub async fn latest(&self) -> Result<Option<RecoveryPoint>> {
        let ids = self.ids_newest_first().await?;
        let Some(latest_id) = ids.first() else {
            return Ok(None);
        };

        match self.load(latest_id).await {
            Ok(point) => Ok(Some(point)),
            Err(e) => {
                warn!(recovery_point = %latest_id, error = %e, "Failed to load latest recovery point");
                Ok(None)
            }
        }
    }

    /// Replace live state with the snapshot of `id`.
    ///
    /// The point is loaded and validated before anything is written; the
    /// current raw document is then backed up under a `pre-recovery_` id.
    pub async fn restore(&self, id: &str) -> Result<ExecutionState> {
        let point = self.load(id).await?;

        let backup = self.backup_current().await?;
        let restored = self.store.replace(point.state_snapshot)?;

        info!(
            recovery_point = %id,
            backup = backup.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            "State restored from recovery point"
        );

        self.prune_backups(self.max_retained).await?;
        Ok(restored)
    }

    /// Restore the newest point that parses, skipping corrupt ones.
    pub async fn restore_latest_valid(&self) -> Result<(String, ExecutionState)> {
        for id in self.ids_newest_first().await? {
            match self.load(&id).await {
                Ok(_) => {
                    let state = self.restore(&id).await?;
                    return Ok((id, state));
                }
                Err(WardenError::CorruptRecoveryPoint { id, reason }) => {
                    warn!(recovery_point = %id, reason, "Skipping corrupt recovery point");
                }
                Err(e) => return Err(e),
            }
        }
        Err(WardenError::NoRecoveryPoint)
    }

    async fn backup_current(&self) -> Result<Option<PathBuf>> {
        let Some(raw) = self.store.read_raw()? else {
            return Ok(None);
        };

        let dir = self.backup_dir();
        fs::create_dir_all(&dir).await?;

        let mut ts = Utc::now();
        let mut path = dir.join(format!("{}{}.json", BACKUP_PREFIX, format_id(ts)));
        while path.exists() {
            ts += Duration::microseconds(1);
            path = dir.join(format!("{}{}.json", BACKUP_PREFIX, format_id(ts)));
        }

        write_atomic_async(&path, raw.as_bytes()).await?;
        Ok(Some(path))
    }

    /// Pre-recovery backups, newest first.
    pub async fn backups(&self) -> Result<Vec<PathBuf>> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"))
            {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| b.cmp(a));
        Ok(paths)
    }

    async fn prune_backups(&self, keep: usize) -> Result<usize> {
        let backups = self.backups().await?;
        let mut deleted = 0;
        for path in backups.iter().skip(keep.max(1)) {
            if fs::remove_file(path).await.is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete the oldest points beyond `max_retained`. The newest point is
    /// always kept. Returns the number of points deleted.
    pub async fn prune(&self, max_retained: usize) -> Result<usize> {
        let keep = max_retained.max(1);
        let ids = self.ids_newest_first().await?;
        if ids.len() <= keep {
            return Ok(0);
        }

        let mut deleted = 0;
        for id in &ids[keep..] {
            if fs::remove_file(self.point_file(id)).await.is_ok() {
                deleted += 1;
            }
            let _ = fs::remove_file(self.note_file(id)).await;
        }

        info!(deleted, kept = keep, "Pruned old recovery points");
        Ok(deleted)
    }
}

fn render_note(point: &RecoveryPoint) -> String {
    let state = &point.state_snapshot;
    let mut lines = vec![
        format!("# Recovery Point {}", point.id),
        String::new(),
        format!("- Created: {}", point.created_at.to_rfc3339()),
        format!(
            "- Task: {}",
            point.associated_task_id.as_deref().unwrap_or("(none)")
        ),
        format!("- Reason: {}", point.reason),
        format!("- Pipeline status: {}", state.status),
        format!(
            "- Progress: {}/{} completed, {} failed",
            state.completed_tasks, state.total_tasks, state.failed_tasks
        ),
        format!("- Retries: {} total", state.retry_info.total_retries),
        String::new(),
        "| Task | Status | Retries |".to_string(),
        "|------|--------|---------|".to_string(),
    ];
    for task in state.ordered_tasks() {
        lines.push(format!(
            "| {} | {} | {} |",
            task.id,
            task.status,
            state.retries_for(&task.id)
        ));
    }
    lines.push(String::new());
    lines.push(format!("Restore with: `claude-warden recover restore {}`", point.id));
    lines.push(String::new());
    lines.join("\n")
}
