//! Append-only alert history (`logs/alerts.jsonl`) with size-based rotation.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::Alert;
use crate::error::Result;
use crate::utils::{FileLock, append_line, lock_path_for, write_atomic};

#[derive(Debug, Clone)]
pub struct AlertHistory {
    path: PathBuf,
    max_bytes: u64,
    retain: usize,
}

impl AlertHistory {
    pub fn new(path: impl AsRef<Path>, max_bytes: u64, retain: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_bytes,
            retain: retain.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append and rotate under `alerts.jsonl.lock`, so a rotation in one
    /// process never drops a line another process just appended.
    pub fn append(&self, alert: &Alert) -> Result<()> {
        let line = serde_json::to_string(alert)?;
        let _flock = FileLock::acquire(&lock_path_for(&self.path))?;
        append_line(&self.path, &line)?;
        self.rotate_if_needed()
    }

    /// Oldest first.
    pub fn all(&self) -> Result<Vec<Alert>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed alert line");
                    None
                }
            })
            .collect())
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Alert>> {
        let mut alerts = self.all()?;
        alerts.reverse();
        alerts.truncate(limit);
        Ok(alerts)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let size = std::fs::metadata(&self.path)?.len();
        if size <= self.max_bytes {
            return Ok(());
        }

        let alerts = self.all()?;
        let dropped = alerts.len().saturating_sub(self.retain);
        let kept = &alerts[dropped..];

        let mut content = String::new();
        for alert in kept {
            content.push_str(&serde_json::to_string(alert)?);
            content.push('\n');
        }
        write_atomic(&self.path, content.as_bytes())?;

        info!(
            path = %self.path.display(),
            dropped,
            kept = kept.len(),
            "Alert history rotated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Severity;
    use crate::notification::AlertKind;
    use tempfile::TempDir;

    fn alert(n: usize) -> Alert {
        Alert::new(AlertKind::HealthFinding, Severity::Medium, format!("alert {}", n))
    }

    #[test]
    fn test_append_and_recent() {
        let dir = TempDir::new().unwrap();
        let history = AlertHistory::new(dir.path().join("alerts.jsonl"), 1024 * 1024, 100);

        for n in 0..5 {
            history.append(&alert(n)).unwrap();
        }

        let recent = history.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "alert 4");
        assert_eq!(recent[1].message, "alert 3");
        assert_eq!(history.all().unwrap().len(), 5);
    }

    #[test]
    fn test_rotation_keeps_newest_entries() {
        let dir = TempDir::new().unwrap();
        let history = AlertHistory::new(dir.path().join("alerts.jsonl"), 512, 3);

        for n in 0..20 {
            history.append(&alert(n)).unwrap();
        }

        let all = history.all().unwrap();
        assert!((3..=5).contains(&all.len()));
        assert_eq!(all.last().unwrap().message, "alert 19");
        assert!(std::fs::metadata(history.path()).unwrap().len() <= 512 + 256);
    }

    #[test]
    fn test_concurrent_appends_survive_rotation() {
        const WRITERS: usize = 4;
        const ALERTS: usize = 25;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");

        // Tiny size limit rotates on every append; retention keeps everything.
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let history = AlertHistory::new(&path, 64, 10_000);
                    for n in 0..ALERTS {
                        history.append(&alert(w * 1000 + n)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = AlertHistory::new(&path, 64, 10_000);
        assert_eq!(history.all().unwrap().len(), WRITERS * ALERTS);
    }
}
