//! Host and network probes behind a trait so checks can run against fakes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use super::types::{Connectivity, ResourceSnapshot};

#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Disk usage of the filesystem holding `path`, memory and load.
    /// Metrics the platform cannot provide are left as `None`.
    async fn resources(&self, path: &Path) -> ResourceSnapshot;

    /// TCP connect to `host:port` within `timeout`.
    async fn reachable(&self, target: &str, timeout: Duration) -> bool;

    async fn connectivity(
        &self,
        network_target: &str,
        api_target: &str,
        timeout: Duration,
    ) -> Connectivity {
        let (network_reachable, agent_api_reachable) = tokio::join!(
            self.reachable(network_target, timeout),
            self.reachable(api_target, timeout)
        );
        Connectivity {
            network_reachable,
            agent_api_reachable,
        }
    }
}

/// Probes the real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

#[async_trait]
impl SystemProbe for HostProbe {
    async fn resources(&self, path: &Path) -> ResourceSnapshot {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || ResourceSnapshot {
            disk_usage_percent: disk_usage_percent(&path),
            memory_usage_percent: memory_usage_percent(),
            load_average: load_average(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        })
        .await
        .unwrap_or_default()
    }

    async fn reachable(&self, target: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(target, error = %e, "Probe connect failed");
                false
            }
            Err(_) => {
                debug!(target, timeout_secs = timeout.as_secs(), "Probe timed out");
                false
            }
        }
    }
}

#[cfg(unix)]
fn disk_usage_percent(path: &Path) -> Option<f64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let blocks = stat.blocks() as f64;
    let free = stat.blocks_free() as f64;
    let available = stat.blocks_available() as f64;
    // Same formula as df: used / (used + available to unprivileged users).
    let used = blocks - free;
    let denom = used + available;
    if denom <= 0.0 {
        return None;
    }
    Some(used / denom * 100.0)
}

#[cfg(not(unix))]
fn disk_usage_percent(_path: &Path) -> Option<f64> {
    None
}

fn memory_usage_percent() -> Option<f64> {
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo")
        && let Some(pct) = parse_meminfo(&meminfo)
    {
        return Some(pct);
    }
    sysinfo_memory_percent()
}

/// Used memory as a percentage, from `MemTotal` and `MemAvailable` (kB).
pub(crate) fn parse_meminfo(content: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        content
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn sysinfo_memory_percent() -> Option<f64> {
    let info = nix::sys::sysinfo::sysinfo().ok()?;
    let total = info.ram_total() as f64;
    if total <= 0.0 {
        return None;
    }
    Some((total - info.ram_unused() as f64) / total * 100.0)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn sysinfo_memory_percent() -> Option<f64> {
    None
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn load_average() -> Option<f64> {
    nix::sys::sysinfo::sysinfo()
        .ok()
        .map(|info| info.load_average().0)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn load_average() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let pct = parse_meminfo(content).unwrap();
        assert!((pct - 75.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_meminfo_missing_fields() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        // Port 1 on localhost is essentially never listening.
        let ok = HostProbe
            .reachable("127.0.0.1:1", Duration::from_millis(500))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_reachable_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(HostProbe.reachable(&addr, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_resources_report_cpu_count() {
        let snapshot = HostProbe.resources(Path::new(".")).await;
        assert!(snapshot.cpu_count >= 1);
        if let Some(disk) = snapshot.disk_usage_percent {
            assert!((0.0..=100.0).contains(&disk));
        }
    }
}
