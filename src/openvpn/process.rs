//! OpenVPN process lifecycle: locate, spawn, inspect and stop

use crate::openvpn::ClientError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, kill};
#[cfg(unix)]
use nix::unistd::Pid;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const PROCESS_NAME: &str = "openvpn";

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Terminated,
    Killed,
}

pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// The configured binary, or `openvpn` from PATH.
pub fn find_binary(configured: Option<&Path>) -> Result<PathBuf, ClientError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(ClientError::BinaryNotFound(path.display().to_string())),
        None => which::which(PROCESS_NAME)
            .map_err(|_| ClientError::BinaryNotFound(PROCESS_NAME.to_string())),
    }
}

/// `<binary> --auth-nocache --log <log> --config <config>`
pub fn build_args(config_path: &Path, log_path: &Path) -> Vec<String> {
    vec![
        "--auth-nocache".to_string(),
        "--log".to_string(),
        log_path.display().to_string(),
        "--config".to_string(),
        config_path.display().to_string(),
    ]
}

/// Start the client in its own process group so a terminal Ctrl+C reaches
/// only us; we stop the client ourselves.
pub fn spawn(binary: &Path, config_path: &Path, log_path: &Path) -> Result<Child, ClientError> {
    let args = build_args(config_path, log_path);
    debug!("Spawning {} {}", binary.display(), args.join(" "));

    let mut command = Command::new(binary);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| ClientError::Spawn {
        binary: binary.display().to_string(),
        source,
    })
}

/// Whether a process with this PID exists.
///
/// Zero and negative values address process groups, never a single client.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    #[cfg(unix)]
    {
        // EPERM still means the process exists
        matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Process name from `/proc/<pid>/comm`, where procfs exists.
pub fn process_name(pid: i32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{}/comm", pid))
        .ok()
        .map(|name| name.trim().to_string())
}

/// Alive and, where the name can be read, actually an OpenVPN client.
pub fn is_openvpn(pid: i32) -> bool {
    is_alive(pid) && process_name(pid).is_none_or(|name| name == PROCESS_NAME)
}

#[cfg(unix)]
fn signal(pid: i32, sig: Signal) -> Result<bool, ClientError> {
    if pid <= 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(pid), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(ClientError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

/// SIGTERM, wait up to `timeout`, then SIGKILL.
///
/// For a process we did not spawn; our own children go through
/// `stop_child` so they get reaped.
#[cfg(unix)]
pub async fn terminate(pid: i32, timeout: Duration) -> Result<StopOutcome, ClientError> {
    if !signal(pid, Signal::SIGTERM)? {
        return Ok(StopOutcome::AlreadyStopped);
    }
    info!("Sent SIGTERM to OpenVPN process {}", pid);

    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        if !is_alive(pid) {
            return Ok(StopOutcome::Terminated);
        }
    }

    warn!("OpenVPN process {} ignored SIGTERM, killing it", pid);
    if signal(pid, Signal::SIGKILL)? {
        Ok(StopOutcome::Killed)
    } else {
        Ok(StopOutcome::Terminated)
    }
}

#[cfg(not(unix))]
pub async fn terminate(_pid: i32, _timeout: Duration) -> Result<StopOutcome, ClientError> {
    Err(ClientError::Unsupported)
}

/// Graceful stop of a client spawned by this process.
pub async fn stop_child(child: &mut Child, timeout: Duration) -> Result<StopOutcome, ClientError> {
    let Some(pid) = child.id() else {
        return Ok(StopOutcome::AlreadyStopped);
    };

    #[cfg(unix)]
    {
        let pid = pid as i32;
        if !signal(pid, Signal::SIGTERM)? {
            let _ = child.wait().await;
            return Ok(StopOutcome::AlreadyStopped);
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(_) => Ok(StopOutcome::Terminated),
        Err(_) => {
            warn!("OpenVPN client ignored SIGTERM, killing it");
            child.kill().await.map_err(|e| ClientError::Signal {
                pid: pid as i32,
                message: e.to_string(),
            })?;
            Ok(StopOutcome::Killed)
        }
    }
}

/// Last `count` lines of a log file; empty if it cannot be read.
pub fn tail(path: &Path, count: usize) -> Vec<String> {
    let Ok(bytes) = std::fs::read(path) else {
        return Vec::new();
    };
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    lines[lines.len().saturating_sub(count)..]
        .iter()
        .map(|line| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_args() {
        let args = build_args(Path::new("/tmp/x.ovpn"), Path::new("/root/openvpn.log"));
        assert_eq!(
            args,
            vec![
                "--auth-nocache",
                "--log",
                "/root/openvpn.log",
                "--config",
                "/tmp/x.ovpn"
            ]
        );
    }

    #[test]
    fn test_tail() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("openvpn.log");
        let lines: Vec<String> = (1..=8).map(|i| format!("line {}", i)).collect();
        std::fs::write(&log, lines.join("\n")).unwrap();

        assert_eq!(
            tail(&log, 5),
            vec!["line 4", "line 5", "line 6", "line 7", "line 8"]
        );
        assert_eq!(tail(&log, 20).len(), 8);
        assert!(tail(&dir.path().join("missing.log"), 5).is_empty());
    }

    #[test]
    fn test_configured_binary_must_exist() {
        let err = find_binary(Some(Path::new("/nonexistent/openvpn"))).unwrap_err();
        assert!(matches!(err, ClientError::BinaryNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id() as i32));
    }

    #[test]
    fn test_group_pids_are_not_alive() {
        for pid in [0, -1, i32::MIN] {
            assert!(!is_alive(pid));
            assert!(!is_openvpn(pid));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_refuses_group_pids() {
        for pid in [0, -1] {
            let outcome = terminate(pid, Duration::from_millis(10)).await.unwrap();
            assert_eq!(outcome, StopOutcome::AlreadyStopped);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_process_is_not_openvpn() {
        let pid = std::process::id() as i32;
        assert!(process_name(pid).is_some());
        assert!(!is_openvpn(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let outcome = stop_child(&mut child, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Terminated);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_missing_process() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap() as i32;
        child.wait().await.unwrap();

        let outcome = terminate(pid, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyStopped);
    }
}
