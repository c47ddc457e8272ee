//! Durable single-document state store.
//!
//! Every mutation is a locked read-modify-write: an in-process mutex plus an
//! exclusive `flock` on `<state>.lock`, then write-to-temp and rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::model::ExecutionState;
use crate::error::{Result, WardenError};
use crate::utils::{FileLock, lock_path_for, remove_stale_temp, write_atomic};

#[derive(Clone)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = lock_path_for(&path);

        let store = Self {
            path,
            lock_path,
            guard: Arc::new(Mutex::new(())),
        };

        {
            let _local = store.guard.lock();
            let _flock = FileLock::acquire(&store.lock_path)?;
            remove_stale_temp(&store.path);
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn read(&self) -> Result<ExecutionState> {
        let raw = self.read_raw()?.ok_or(WardenError::StateNotInitialized)?;
        self.parse(&raw)
    }

    /// Raw document bytes, `None` when no document exists yet.
    pub fn read_raw(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn parse(&self, raw: &str) -> Result<ExecutionState> {
        serde_json::from_str(raw).map_err(|e| WardenError::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    pub fn update<F>(&self, mutator: F) -> Result<ExecutionState>
    where
        F: FnOnce(&mut ExecutionState) -> Result<()>,
    {
        self.update_with(mutator).map(|(state, ())| state)
    }

    /// Like `update`, but the mutator can hand a value back to the caller.
    /// A failing mutator leaves the document untouched, and so does one that
    /// changes nothing: `lastUpdatedAt` only moves with real mutations.
    pub fn update_with<F, T>(&self, mutator: F) -> Result<(ExecutionState, T)>
    where
        F: FnOnce(&mut ExecutionState) -> Result<T>,
    {
        let _local = self.guard.lock();
        let _flock = FileLock::acquire(&self.lock_path)?;

        let before = self.read()?;
        let mut state = before.clone();
        let value = mutator(&mut state)?;

        state.heal_current_task();
        state.refresh_counters();
        if state == before {
            debug!("Update changed nothing, skipping write");
            return Ok((state, value));
        }
        state.last_updated_at = Utc::now();

        self.write(&state)?;
        Ok((state, value))
    }

    /// Overwrite the document without parsing what is on disk.
    pub fn replace(&self, mut state: ExecutionState) -> Result<ExecutionState> {
        let _local = self.guard.lock();
        let _flock = FileLock::acquire(&self.lock_path)?;

        state.heal_current_task();
        state.refresh_counters();
        state.last_updated_at = Utc::now();

        self.write(&state)?;
        info!(path = %self.path.display(), "State document replaced");
        Ok(state)
    }

    pub fn initialize(&self, mut state: ExecutionState, force: bool) -> Result<ExecutionState> {
        let _local = self.guard.lock();
        let _flock = FileLock::acquire(&self.lock_path)?;

        if self.path.exists() && !force {
            return Err(WardenError::StateAlreadyExists(self.path.clone()));
        }

        state.refresh_counters();
        state.last_updated_at = Utc::now();
        self.write(&state)?;

        info!(
            path = %self.path.display(),
            tasks = state.total_tasks,
            "State document initialized"
        );
        Ok(state)
    }

    fn write(&self, state: &ExecutionState) -> Result<()> {
        let content = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &content)?;
        debug!(
            status = %state.status,
            total_retries = state.retry_info.total_retries,
            "State persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PipelineStatus, Task, TaskStatus};
    use tempfile::TempDir;

    fn store_with_tasks(dir: &TempDir) -> StateStore {
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        store
            .initialize(
                ExecutionState::new(vec![Task::new("T1"), Task::new("T2")]),
                false,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_read_before_init() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join("state.json")).unwrap();
        assert!(matches!(store.read(), Err(WardenError::StateNotInitialized)));
    }

    #[test]
    fn test_update_persists_and_refreshes_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        let before = store.read().unwrap().last_updated_at;

        let updated = store
            .update(|s| s.start_task("T1", Utc::now()))
            .unwrap();

        assert!(updated.last_updated_at >= before);
        let reread = store.read().unwrap();
        assert_eq!(reread.status, PipelineStatus::Running);
        assert_eq!(reread.task("T1").unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn test_noop_update_keeps_timestamp() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        let raw_before = store.read_raw().unwrap();

        let state = store.update(|_| Ok(())).unwrap();
        let state_after_read = store.read().unwrap();

        assert_eq!(store.read_raw().unwrap(), raw_before);
        assert_eq!(state.last_updated_at, state_after_read.last_updated_at);
    }

    #[test]
    fn test_failed_mutator_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        let raw_before = store.read_raw().unwrap();

        let result = store.update(|s| {
            s.retry_info.total_retries = 99;
            Err(WardenError::Other("rejected".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.read_raw().unwrap(), raw_before);
    }

    #[test]
    fn test_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();

        let err = store.read().unwrap_err();
        assert!(matches!(err, WardenError::CorruptState { .. }));
        assert!(err.is_fatal());
        assert!(store.update(|_| Ok(())).is_err());
    }

    #[test]
    fn test_replace_works_over_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        std::fs::write(store.path(), "garbage").unwrap();

        store
            .replace(ExecutionState::new(vec![Task::new("X")]))
            .unwrap();
        assert!(store.read().unwrap().task("X").is_some());
    }

    #[test]
    fn test_initialize_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        let again = store.initialize(ExecutionState::new(vec![Task::new("Z")]), false);
        assert!(matches!(again, Err(WardenError::StateAlreadyExists(_))));

        store
            .initialize(ExecutionState::new(vec![Task::new("Z")]), true)
            .unwrap();
        assert_eq!(store.read().unwrap().total_tasks, 1);
    }

    #[test]
    fn test_dangling_current_task_healed_on_update() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        let state = store
            .update(|s| {
                s.current_task_id = Some("ghost".into());
                Ok(())
            })
            .unwrap();
        assert!(state.current_task_id.is_none());
    }

    #[test]
    fn test_update_with_returns_value() {
        let dir = TempDir::new().unwrap();
        let store = store_with_tasks(&dir);
        let (state, count) = store
            .update_with(|s| {
                s.retry_info.total_retries += 1;
                Ok(s.retry_info.total_retries)
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(state.retry_info.total_retries, 1);
    }

    #[test]
    fn test_stale_temp_removed_on_open() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("state.json.tmp");
        std::fs::write(&tmp, "partial").unwrap();
        StateStore::open(dir.path().join("state.json")).unwrap();
        assert!(!tmp.exists());
    }
}
