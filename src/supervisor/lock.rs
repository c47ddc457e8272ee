//! Single-supervisor enforcement via a pid + heartbeat lock file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WardenError};

const LOCK_FILE: &str = "supervisor.lock";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const STALE_THRESHOLD: Duration = Duration::from_secs(60);

fn get_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub hostname: String,
}

impl LockInfo {
    pub fn current() -> Self {
        let now = Utc::now();
        Self {
            pid: std::process::id(),
            started_at: now,
            last_heartbeat: now,
            hostname: get_hostname(),
        }
    }

    pub fn is_process_alive(&self) -> bool {
        if self.hostname != get_hostname() {
            return false;
        }
        is_process_running(self.pid)
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_heartbeat);
        // Negative elapsed means clock skew; allow reclaiming.
        elapsed.to_std().map(|d| d > threshold).unwrap_or(true)
    }

    pub fn is_valid(&self, threshold: Duration) -> bool {
        self.is_process_alive() && !self.is_stale(threshold)
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

pub struct SupervisorLock {
    locks_dir: PathBuf,
    stale_threshold: Duration,
    heartbeat_interval: Duration,
}

impl SupervisorLock {
    pub fn new(locks_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            stale_threshold: STALE_THRESHOLD,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.locks_dir.join(LOCK_FILE)
    }

    fn temp_lock_path(&self) -> PathBuf {
        self.locks_dir
            .join(format!("{}.{}.tmp", LOCK_FILE, std::process::id()))
    }

    /// Take the lock, reclaiming it when the holder is dead or its heartbeat
    /// is stale.
    pub async fn acquire(&self) -> Result<LockGuard> {
        fs::create_dir_all(&self.locks_dir).await?;
        let lock_path = self.lock_path();

        match self.read().await {
            Ok(Some(existing)) if existing.is_valid(self.stale_threshold) => {
                return Err(WardenError::DaemonAlreadyRunning { pid: existing.pid });
            }
            Ok(Some(existing)) => {
                info!(old_pid = existing.pid, "Reclaiming stale supervisor lock");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Unreadable supervisor lock, reclaiming");
            }
        }

        let info = LockInfo::current();
        let temp_path = self.temp_lock_path();
        fs::write(&temp_path, serde_yaml_bw::to_string(&info)?).await?;

        if let Err(e) = fs::rename(&temp_path, &lock_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(WardenError::LockAcquisitionFailed(format!(
                "{}: {}",
                lock_path.display(),
                e
            )));
        }

        // Another supervisor may have renamed over us in the same instant.
        match self.read().await? {
            Some(holder) if holder.pid == info.pid => {}
            Some(holder) => return Err(WardenError::DaemonAlreadyRunning { pid: holder.pid }),
            None => {
                return Err(WardenError::LockAcquisitionFailed(
                    "lock file vanished after acquisition".to_string(),
                ));
            }
        }

        debug!(pid = info.pid, "Supervisor lock acquired");
        Ok(LockGuard::new(lock_path, self.heartbeat_interval))
    }

    pub async fn read(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(self.lock_path()).await {
            Ok(content) => Ok(Some(serde_yaml_bw::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The live holder, if any.
    pub async fn holder(&self) -> Result<Option<LockInfo>> {
        Ok(self
            .read()
            .await?
            .filter(|l| l.is_valid(self.stale_threshold)))
    }

    /// Remove the lock file when its holder is gone. Returns whether a file was removed.
    pub async fn remove_if_stale(&self) -> Result<bool> {
        let stale = match self.read().await {
            Ok(Some(info)) => !info.is_valid(self.stale_threshold),
            Ok(None) => return Ok(false),
            Err(_) => true,
        };
        if !stale {
            return Ok(false);
        }
        match fs::remove_file(self.lock_path()).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask a running supervisor to stop. Returns the pid signalled.
    pub async fn request_stop(&self) -> Result<Option<u32>> {
        let Some(holder) = self.holder().await? else {
            return Ok(None);
        };
        send_terminate(holder.pid)?;
        info!(pid = holder.pid, "Sent SIGTERM to supervisor");
        Ok(Some(holder.pid))
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| WardenError::Other(format!("failed to signal pid {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn send_terminate(pid: u32) -> Result<()> {
    Err(WardenError::Other(format!(
        "stopping pid {} is only supported on unix",
        pid
    )))
}

pub struct LockGuard {
    path: PathBuf,
    shutdown_tx: Option<watch::Sender<bool>>,
    heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
}

impl LockGuard {
    const MAX_CONSECUTIVE_FAILURES: u32 = 3;

    fn new(path: PathBuf, heartbeat_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lock_path = path.clone();

        let handle = tokio::spawn(async move {
            Self::heartbeat_loop(lock_path, heartbeat_interval, shutdown_rx).await;
        });

        Self {
            path,
            shutdown_tx: Some(shutdown_tx),
            heartbeat_handle: Some(handle),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn heartbeat_loop(
        lock_path: PathBuf,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = Self::refresh_heartbeat(&lock_path).await {
                        failures += 1;
                        if failures == Self::MAX_CONSECUTIVE_FAILURES {
                            error!(error = %e, failures, "Supervisor lock heartbeat keeps failing; the lock will go stale");
                        } else {
                            warn!(error = %e, failures, "Supervisor lock heartbeat failed");
                        }
                    } else {
                        failures = 0;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(path = %lock_path.display(), "Heartbeat stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Rewrite `last_heartbeat`, by temp file and rename.
    async fn refresh_heartbeat(lock_path: &Path) -> Result<()> {
        let mut info: LockInfo = serde_yaml_bw::from_str(&fs::read_to_string(lock_path).await?)?;
        info.last_heartbeat = Utc::now();

        let temp_path = lock_path.with_extension("lock.tmp");
        fs::write(&temp_path, serde_yaml_bw::to_string(&info)?).await?;
        fs::rename(&temp_path, lock_path).await?;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
        }

        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            if !std::thread::panicking() {
                warn!(error = %e, "Failed to release supervisor lock");
            } else {
                eprintln!("[claude-warden] Failed to release supervisor lock: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_second_acquire_refused() {
        let dir = TempDir::new().unwrap();
        let lock = SupervisorLock::new(dir.path());

        let guard = lock.acquire().await.unwrap();
        let holder = lock.holder().await.unwrap().unwrap();
        assert_eq!(holder.pid, std::process::id());

        match lock.acquire().await {
            Err(WardenError::DaemonAlreadyRunning { pid }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected DaemonAlreadyRunning, got {:?}", other.map(|_| ())),
        }

        drop(guard);
        assert!(!lock.lock_path().exists());
        assert!(lock.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_reclaimed() {
        let dir = TempDir::new().unwrap();
        let lock = SupervisorLock::new(dir.path());

        let mut dead = LockInfo::current();
        dead.last_heartbeat = Utc::now() - chrono::Duration::seconds(600);
        std::fs::write(lock.lock_path(), serde_yaml_bw::to_string(&dead).unwrap()).unwrap();

        assert!(lock.holder().await.unwrap().is_none());
        let _guard = lock.acquire().await.unwrap();
        assert!(lock.holder().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_if_stale() {
        let dir = TempDir::new().unwrap();
        let lock = SupervisorLock::new(dir.path());
        assert!(!lock.remove_if_stale().await.unwrap());

        std::fs::write(lock.lock_path(), "not: [valid").unwrap();
        assert!(lock.remove_if_stale().await.unwrap());
        assert!(!lock.lock_path().exists());
    }

    #[test]
    fn test_foreign_host_not_alive() {
        let mut info = LockInfo::current();
        info.hostname = "some-other-host-name".to_string();
        assert!(!info.is_process_alive());
    }
}
