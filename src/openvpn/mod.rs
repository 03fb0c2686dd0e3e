//! OpenVPN client driver
//!
//! Connects the local machine to the endpoint recorded by `create`: the
//! endpoint's exported client configuration is combined with the client
//! certificate and key, written to a temporary `.ovpn` file and handed to
//! `openvpn`. The client PID is recorded so `disconnect` and `status` work
//! from later invocations.

pub mod config;
pub mod process;

pub use process::StopOutcome;

use crate::aws::NetworkApi;
use crate::config::VpnConfig;
use crate::error::PivotError;
use crate::state::{StateDelta, StateKey, StateRecord, StateStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Child;
use tracing::{debug, info, warn};

const LOG_FILE: &str = "openvpn.log";
const TAIL_LINES: usize = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(
        "This command requires root privileges in order to run the OpenVPN client in the background"
    )]
    NotRoot,
    #[error("OpenVPN binary not found: {0}")]
    BinaryNotFound(String),
    #[error("OpenVPN client is already running as process {0}; run disconnect first")]
    AlreadyRunning(i32),
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write the OpenVPN configuration: {0}")]
    ConfigFile(#[source] std::io::Error),
    #[error("OpenVPN client exited ({0}); check the connection log")]
    Exited(String),
    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: i32, message: String },
    #[error("Process control is not supported on this platform")]
    Unsupported,
}

/// What `status` found for the recorded client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    NeverConnected,
    Alive { pid: i32, log: Option<PathBuf> },
    Dead { pid: i32, log: Option<PathBuf> },
}

/// `openvpn.log` next to the state file.
pub fn log_path(store: &StateStore) -> PathBuf {
    store.dir().join(LOG_FILE)
}

fn recorded_pid(record: &StateRecord) -> Option<i32> {
    record
        .number(StateKey::VpnProcessId)
        .and_then(|pid| i32::try_from(pid).ok())
        .filter(|pid| *pid > 0)
}

/// Endpoint ID plus the client certificate and key paths.
fn connection_inputs(record: &StateRecord) -> Result<(&str, &Path, &Path), PivotError> {
    if let Some(pid) = recorded_pid(record) {
        if process::is_openvpn(pid) {
            return Err(ClientError::AlreadyRunning(pid).into());
        }
    }

    let text = move |key| record.text(key).ok_or(PivotError::MissingState(key));
    Ok((
        text(StateKey::VpnEndpointId)?,
        Path::new(text(StateKey::ClientCertPath)?),
        Path::new(text(StateKey::ClientKeyPath)?),
    ))
}

fn read_pem(path: &Path) -> Result<String, PivotError> {
    std::fs::read_to_string(path).map_err(|source| PivotError::LocalFile {
        path: path.to_path_buf(),
        source,
    })
}

fn print_log_tail(log: &Path) {
    println!("\nLast {} lines from connection log:", TAIL_LINES);
    for line in process::tail(log, TAIL_LINES) {
        println!("    {}", line);
    }
}

/// Start the OpenVPN client against the recorded endpoint.
///
/// Waits `startup_wait_secs` and prints the end of the log. With
/// `foreground`, keeps waiting until the client exits or `interrupted` is
/// raised, then stops it.
pub async fn connect<A: NetworkApi>(
    api: &A,
    store: &StateStore,
    vpn: &VpnConfig,
    foreground: bool,
    interrupted: &AtomicBool,
) -> Result<(), PivotError> {
    if !process::is_root() {
        return Err(ClientError::NotRoot.into());
    }
    let binary = process::find_binary(vpn.openvpn_binary.as_deref())?;

    let record = store.read_all()?;
    let (endpoint_id, cert_path, key_path) = connection_inputs(&record)?;
    let cert = read_pem(cert_path)?;
    let key = read_pem(key_path)?;

    let exported = api.export_client_configuration(endpoint_id).await?;
    let content = config::customize(&exported, &cert, &key, config::resolv_hook());

    let mut ovpn = tempfile::Builder::new()
        .prefix("vpc-vpn-pivot-")
        .suffix(".ovpn")
        .tempfile()
        .map_err(ClientError::ConfigFile)?;
    ovpn.write_all(content.as_bytes())
        .and_then(|_| ovpn.flush())
        .map_err(ClientError::ConfigFile)?;
    debug!("Wrote client configuration to {}", ovpn.path().display());

    let log = log_path(store);
    let mut child = process::spawn(&binary, ovpn.path(), &log)?;
    let Some(pid) = child.id() else {
        return Err(ClientError::Exited("no process ID after spawn".to_string()).into());
    };
    store.apply(
        &StateDelta::new()
            .set(StateKey::VpnProcessId, pid)
            .set(StateKey::VpnLogPath, log.as_path()),
    )?;

    println!("OpenVPN client started in process {}", pid);
    println!("VPN connection log is at {}", log.display());

    let stop_timeout = Duration::from_secs(vpn.stop_timeout_secs);
    let startup = Duration::from_secs(vpn.startup_wait_secs);
    let outcome = wait_for(&mut child, Some(startup), interrupted).await;

    // openvpn has read its configuration by now
    drop(ovpn);
    print_log_tail(&log);

    match outcome {
        Wait::Elapsed if !foreground => Ok(()),
        Wait::Elapsed => match wait_for(&mut child, None, interrupted).await {
            Wait::Interrupted => stop(store, &mut child, stop_timeout).await,
            Wait::Exited(status) => client_exited(store, status),
            Wait::Elapsed => Ok(()),
        },
        Wait::Interrupted => stop(store, &mut child, stop_timeout).await,
        Wait::Exited(status) => client_exited(store, status),
    }
}

enum Wait {
    Elapsed,
    Interrupted,
    Exited(String),
}

/// Poll the child until it exits, `interrupted` is raised or `limit` passes.
async fn wait_for(child: &mut Child, limit: Option<Duration>, interrupted: &AtomicBool) -> Wait {
    let deadline = limit.map(|limit| tokio::time::Instant::now() + limit);
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Wait::Interrupted;
        }
        match child.try_wait() {
            Ok(Some(status)) => return Wait::Exited(status.to_string()),
            Ok(None) => {}
            Err(e) => warn!("Failed to poll the OpenVPN client: {}", e),
        }
        if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
            return Wait::Elapsed;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn stop(store: &StateStore, child: &mut Child, timeout: Duration) -> Result<(), PivotError> {
    info!("Interrupted, stopping the OpenVPN client");
    let outcome = process::stop_child(child, timeout).await?;
    store.remove(StateKey::VpnProcessId)?;
    println!("OpenVPN client stopped ({:?})", outcome);
    Ok(())
}

fn client_exited(store: &StateStore, status: String) -> Result<(), PivotError> {
    store.remove(StateKey::VpnProcessId)?;
    Err(ClientError::Exited(status).into())
}

/// Stop the recorded client. AWS resources are left alone.
pub async fn disconnect(store: &StateStore, timeout: Duration) -> Result<StopOutcome, PivotError> {
    let record = store.read_all()?;
    let Some(pid) = recorded_pid(&record) else {
        if record.contains(StateKey::VpnProcessId) {
            warn!("Discarding invalid recorded OpenVPN process ID");
            store.remove(StateKey::VpnProcessId)?;
        } else {
            info!("No OpenVPN client is recorded");
        }
        return Ok(StopOutcome::AlreadyStopped);
    };

    let outcome = if process::is_openvpn(pid) {
        process::terminate(pid, timeout).await?
    } else {
        if process::is_alive(pid) {
            warn!(
                "Process {} is no longer an OpenVPN client, leaving it alone",
                pid
            );
        }
        StopOutcome::AlreadyStopped
    };

    store.remove(StateKey::VpnProcessId)?;
    Ok(outcome)
}

/// Stop a live recorded client ahead of `purge`.
///
/// A failed stop is logged and handed back with the client's PID for
/// reporting; it never blocks the removal of AWS resources.
pub async fn stop_before_purge(
    store: &StateStore,
    record: &StateRecord,
    timeout: Duration,
) -> Option<(i32, PivotError)> {
    let ConnectionStatus::Alive { pid, .. } = status(record) else {
        return None;
    };

    info!("Stopping OpenVPN client {} before purging", pid);
    match disconnect(store, timeout).await {
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to stop OpenVPN client {}: {}", pid, e);
            Some((pid, e))
        }
    }
}

/// Inspect the recorded client without touching it.
pub fn status(record: &StateRecord) -> ConnectionStatus {
    let Some(pid) = recorded_pid(record) else {
        return ConnectionStatus::NeverConnected;
    };
    let log = record.text(StateKey::VpnLogPath).map(PathBuf::from);

    if process::is_openvpn(pid) {
        ConnectionStatus::Alive { pid, log }
    } else {
        ConnectionStatus::Dead { pid, log }
    }
}
