use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, WardenError};

/// Upper bound on bytes read from the end of a file by `tail_lines`.
const TAIL_READ_LIMIT: u64 = 512 * 1024;

fn temp_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.tmp", name)
}

/// Unique per writer, so concurrent writers of one file never share a temp inode.
fn temp_path_for(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}.{}.{}",
        temp_prefix(path),
        std::process::id(),
        Uuid::new_v4().simple()
    ))
}

/// Write-to-temp, fsync, then rename over `path`; readers see the old or the new
/// content, never a partial file.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp_path = temp_path_for(path);

    let write_result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })?;

    debug!(path = %path.display(), "Atomic write completed");
    Ok(())
}

pub async fn write_atomic_async(path: &Path, content: &[u8]) -> Result<()> {
    let path = path.to_path_buf();
    let content = content.to_vec();
    tokio::task::spawn_blocking(move || write_atomic(&path, &content))
        .await
        .map_err(|e| WardenError::Other(format!("atomic write task failed: {}", e)))?
}

/// Remove temp files left behind by interrupted `write_atomic` calls. Callers
/// must hold whatever lock serializes writers of `path`.
pub fn remove_stale_temp(path: &Path) {
    let prefix = temp_prefix(path);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            debug!(path = %entry.path().display(), "Removing interrupted write");
            let _ = fs::remove_file(entry.path());
        }
    }
}

/// Last `n` lines of a text file. Missing files yield an empty list.
pub fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_READ_LIMIT);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<&str> = text.lines().collect();
    // First line is likely cut mid-way when we didn't read from the start.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }

    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// Append one line to a log file, creating parent directories as needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

fn rotated_path(path: &Path, generation: usize) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}", generation));
    path.with_file_name(name)
}

/// Size-based rotation: `file` → `file.1` → ... → `file.<keep>`, oldest dropped.
/// Returns true when a rotation happened.
pub fn rotate_file(path: &Path, max_bytes: u64, keep: usize) -> Result<bool> {
    let size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if size <= max_bytes {
        return Ok(false);
    }

    if keep == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = rotated_path(path, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for generation in (1..keep).rev() {
        let from = rotated_path(path, generation);
        if from.exists() {
            fs::rename(&from, rotated_path(path, generation + 1))?;
        }
    }
    fs::rename(path, rotated_path(path, 1))?;

    debug!(path = %path.display(), size, "Rotated file");
    Ok(true)
}

/// `<file>.lock` beside `path`, shared by every process writing `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Exclusive advisory lock held for the lifetime of the value.
pub struct FileLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl FileLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        #[cfg(unix)]
        {
            let flock = nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusive)
                .map_err(|(_, errno)| {
                    warn!(path = %path.display(), error = %errno, "flock failed");
                    WardenError::LockAcquisitionFailed(format!("{}: {}", path.display(), errno))
                })?;
            Ok(Self { _flock: flock })
        }

        #[cfg(not(unix))]
        {
            Ok(Self { _file: file })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["doc.json"]);
    }

    #[test]
    fn test_temp_paths_are_unique_per_write() {
        let path = Path::new("/tmp/reports/status.json");
        let a = temp_path_for(path);
        let b = temp_path_for(path);
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("status.json.tmp."));
    }

    #[test]
    fn test_concurrent_writers_never_expose_partial_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let big_a = "a".repeat(256 * 1024);
        let big_b = "b".repeat(256 * 1024);

        let handles: Vec<_> = [big_a.clone(), big_b.clone()]
            .into_iter()
            .map(|content| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        write_atomic(&path, content.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last = fs::read_to_string(&path).unwrap();
        assert!(last == big_a || last == big_b);
    }

    #[test]
    fn test_remove_stale_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "live").unwrap();
        fs::write(temp_path_for(&path), "partial").unwrap();
        fs::write(dir.path().join("doc.json.tmp"), "older layout").unwrap();
        fs::write(dir.path().join("other.json.tmp.1.x"), "not ours").unwrap();

        remove_stale_temp(&path);

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["doc.json", "other.json.tmp.1.x"]);
    }

    #[test]
    fn test_tail_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");
        fs::write(&path, "a\nb\nc\nd\n").unwrap();

        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["c", "d"]);
        assert_eq!(tail_lines(&path, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_tail_lines_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(tail_lines(&dir.path().join("nope.log"), 5).unwrap().is_empty());
    }

    #[test]
    fn test_rotate_file_keeps_generations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.log");

        for round in 0..4 {
            fs::write(&path, format!("round {}\n", round).repeat(10)).unwrap();
            assert!(rotate_file(&path, 16, 2).unwrap());
        }

        assert!(!path.exists());
        assert!(rotated_path(&path, 1).exists());
        assert!(rotated_path(&path, 2).exists());
        assert!(!rotated_path(&path, 3).exists());
        let newest = fs::read_to_string(rotated_path(&path, 1)).unwrap();
        assert!(newest.starts_with("round 3"));
    }

    #[test]
    fn test_rotate_small_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.log");
        fs::write(&path, "tiny").unwrap();
        assert!(!rotate_file(&path, 1024, 3).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_append_line_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/logs/errors.jsonl");
        append_line(&path, "one").unwrap();
        append_line(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
