use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::error::Result;

/// Re-launch this binary as `monitor live` in the background, detached from
/// the terminal's process group. Output goes to `log_path`.
pub fn spawn_daemon(project_root: &Path, log_path: &Path, verbose: bool) -> Result<u32> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_path)?;

    let mut cmd = Command::new(std::env::current_exe()?);
    cmd.arg("--project").arg(project_root);
    if verbose {
        cmd.arg("--verbose");
    }
    cmd.args(["monitor", "live"])
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn()?;
    info!(pid = child.id(), log = %log_path.display(), "Supervisor daemon spawned");
    Ok(child.id())
}
