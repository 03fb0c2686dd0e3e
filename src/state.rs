//! Durable provisioning state
//!
//! A single flat JSON record at `~/.vpc_vpn_pivot/state` remembers every
//! remote resource the tool created, the inputs later stages need, and the
//! certificate paths. A key naming a remote resource is present exactly when
//! that resource is believed to exist in the AWS account.
//!
//! The record is always rewritten in full: serialized to a temporary file in
//! the same directory and renamed over the old one. There is no lock; only one
//! process may mutate the record at a time.
//!
//! Values are strict: booleans, integers, strings and string lists. A
//! hand-edited value outside that set (`4242.0`, `null`, an object) fails the
//! load with an error naming the key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const STATE_DIR: &str = ".vpc_vpn_pivot";
const STATE_FILE: &str = "state";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Cannot determine the home directory")]
    NoHomeDir,
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("State file {path} is malformed: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "State file {path} is malformed: `{key}` must be a boolean, an integer, a string or a list of strings"
    )]
    InvalidValue { path: PathBuf, key: String },
}

/// Every key the tool reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Profile,
    Region,
    AccountId,
    CallerArn,
    VpcId,
    VpcCidrBlock,
    DhcpOptionsId,
    SubnetId,
    SubnetCidrBlock,
    CidrBlock,
    DnsServers,
    CaCertPath,
    ServerCertPath,
    ServerKeyPath,
    ClientCertPath,
    ClientKeyPath,
    ServerCertRemoteId,
    ClientCertRemoteId,
    VpnEndpointId,
    AssociationId,
    RouteDestinationCidr,
    IngressTargetCidr,
    SecurityGroupId,
    SecurityGroupIngressAuthorized,
    SecurityGroupApplied,
    VpnProcessId,
    VpnLogPath,
}

impl StateKey {
    pub const ALL: [StateKey; 27] = [
        StateKey::Profile,
        StateKey::Region,
        StateKey::AccountId,
        StateKey::CallerArn,
        StateKey::VpcId,
        StateKey::VpcCidrBlock,
        StateKey::DhcpOptionsId,
        StateKey::SubnetId,
        StateKey::SubnetCidrBlock,
        StateKey::CidrBlock,
        StateKey::DnsServers,
        StateKey::CaCertPath,
        StateKey::ServerCertPath,
        StateKey::ServerKeyPath,
        StateKey::ClientCertPath,
        StateKey::ClientKeyPath,
        StateKey::ServerCertRemoteId,
        StateKey::ClientCertRemoteId,
        StateKey::VpnEndpointId,
        StateKey::AssociationId,
        StateKey::RouteDestinationCidr,
        StateKey::IngressTargetCidr,
        StateKey::SecurityGroupId,
        StateKey::SecurityGroupIngressAuthorized,
        StateKey::SecurityGroupApplied,
        StateKey::VpnProcessId,
        StateKey::VpnLogPath,
    ];

    /// Keys naming something that exists in the AWS account.
    pub const REMOTE_RESOURCES: [StateKey; 9] = [
        StateKey::ServerCertRemoteId,
        StateKey::ClientCertRemoteId,
        StateKey::VpnEndpointId,
        StateKey::AssociationId,
        StateKey::RouteDestinationCidr,
        StateKey::IngressTargetCidr,
        StateKey::SecurityGroupId,
        StateKey::SecurityGroupIngressAuthorized,
        StateKey::SecurityGroupApplied,
    ];

    pub const CERTIFICATE_PATHS: [StateKey; 5] = [
        StateKey::CaCertPath,
        StateKey::ServerCertPath,
        StateKey::ServerKeyPath,
        StateKey::ClientCertPath,
        StateKey::ClientKeyPath,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            StateKey::Profile => "profile",
            StateKey::Region => "region",
            StateKey::AccountId => "accountId",
            StateKey::CallerArn => "callerArn",
            StateKey::VpcId => "vpcId",
            StateKey::VpcCidrBlock => "vpcCidrBlock",
            StateKey::DhcpOptionsId => "dhcpOptionsId",
            StateKey::SubnetId => "subnetId",
            StateKey::SubnetCidrBlock => "subnetCidrBlock",
            StateKey::CidrBlock => "cidrBlock",
            StateKey::DnsServers => "dnsServers",
            StateKey::CaCertPath => "caCertPath",
            StateKey::ServerCertPath => "serverCertPath",
            StateKey::ServerKeyPath => "serverKeyPath",
            StateKey::ClientCertPath => "clientCertPath",
            StateKey::ClientKeyPath => "clientKeyPath",
            StateKey::ServerCertRemoteId => "serverCertRemoteId",
            StateKey::ClientCertRemoteId => "clientCertRemoteId",
            StateKey::VpnEndpointId => "vpnEndpointId",
            StateKey::AssociationId => "associationId",
            StateKey::RouteDestinationCidr => "routeDestinationCidr",
            StateKey::IngressTargetCidr => "ingressTargetCidr",
            StateKey::SecurityGroupId => "securityGroupId",
            StateKey::SecurityGroupIngressAuthorized => "securityGroupIngressAuthorized",
            StateKey::SecurityGroupApplied => "securityGroupApplied",
            StateKey::VpnProcessId => "vpnProcessId",
            StateKey::VpnLogPath => "vpnLogPath",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar or a list of strings. Nested objects are rejected on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Flag(bool),
    Number(i64),
    Text(String),
    List(Vec<String>),
}

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<&Path> for StateValue {
    fn from(value: &Path) -> Self {
        StateValue::Text(value.to_string_lossy().into_owned())
    }
}

impl From<Vec<String>> for StateValue {
    fn from(value: Vec<String>) -> Self {
        StateValue::List(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value)
    }
}

impl From<u32> for StateValue {
    fn from(value: u32) -> Self {
        StateValue::Number(i64::from(value))
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Flag(value)
    }
}

/// The whole record: string keys to flat values.
///
/// Unknown keys survive a load/save cycle untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateRecord(BTreeMap<String, StateValue>);

impl StateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: StateKey) -> Option<&StateValue> {
        self.0.get(key.as_str())
    }

    pub fn text(&self, key: StateKey) -> Option<&str> {
        self.get(key).and_then(StateValue::as_str)
    }

    pub fn list(&self, key: StateKey) -> Option<&[String]> {
        self.get(key).and_then(StateValue::as_list)
    }

    pub fn number(&self, key: StateKey) -> Option<i64> {
        self.get(key).and_then(StateValue::as_i64)
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.0.contains_key(key.as_str())
    }

    pub fn insert(&mut self, key: StateKey, value: impl Into<StateValue>) {
        self.0.insert(key.as_str().to_string(), value.into());
    }

    pub fn remove(&mut self, key: StateKey) -> Option<StateValue> {
        self.0.remove(key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Remote resources still recorded, in `REMOTE_RESOURCES` order.
    pub fn remote_resources(&self) -> Vec<StateKey> {
        StateKey::REMOTE_RESOURCES
            .into_iter()
            .filter(|key| self.contains(*key))
            .collect()
    }
}

/// Keys set and removed by one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub set: Vec<(StateKey, StateValue)>,
    pub remove: Vec<StateKey>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: StateKey, value: impl Into<StateValue>) -> Self {
        self.set.push((key, value.into()));
        self
    }

    pub fn remove(mut self, key: StateKey) -> Self {
        self.remove.push(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    pub fn apply_to(&self, record: &mut StateRecord) {
        for key in &self.remove {
            record.remove(*key);
        }
        for (key, value) in &self.set {
            record.insert(*key, value.clone());
        }
    }
}

/// Handle on the backing state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store at the fixed per-user location.
    pub fn open_default() -> Result<Self, StateError> {
        Ok(Self::at(state_dir()?.join(STATE_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn ensure_dir(&self) -> Result<(), StateError> {
        fs::create_dir_all(self.dir()).map_err(|source| StateError::Io {
            path: self.dir().to_path_buf(),
            source,
        })
    }

    /// Full record; empty when no state file exists yet.
    pub fn read_all(&self) -> Result<StateRecord, StateError> {
        self.ensure_dir()?;

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateRecord::new()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(StateRecord::new());
        }

        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let mut values = BTreeMap::new();
        for (key, value) in raw {
            let value = serde_json::from_value::<StateValue>(value).map_err(|_| {
                StateError::InvalidValue {
                    path: self.path.clone(),
                    key: key.clone(),
                }
            })?;
            values.insert(key, value);
        }
        Ok(StateRecord(values))
    }

    /// Startup probe: never fails on a missing or unreadable record.
    pub fn probe(&self) -> StateRecord {
        match self.read_all() {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unreadable state: {}", e);
                StateRecord::new()
            }
        }
    }

    pub fn read(&self, key: StateKey) -> Result<Option<StateValue>, StateError> {
        Ok(self.read_all()?.get(key).cloned())
    }

    /// Replace the whole record with a write-to-temp-then-rename.
    pub fn write_all(&self, record: &StateRecord) -> Result<(), StateError> {
        self.ensure_dir()?;

        let io_err = |source: io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        let content = serde_json::to_string_pretty(record).map_err(|source| {
            StateError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.dir()).map_err(io_err)?;
        tmp.write_all(content.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!("Wrote {} state keys to {}", record.len(), self.path.display());
        Ok(())
    }

    pub fn put(&self, key: StateKey, value: impl Into<StateValue>) -> Result<(), StateError> {
        self.apply(&StateDelta::new().set(key, value))
    }

    pub fn remove(&self, key: StateKey) -> Result<(), StateError> {
        self.apply(&StateDelta::new().remove(key))
    }

    /// Read-modify-write of one stage's delta.
    pub fn apply(&self, delta: &StateDelta) -> Result<(), StateError> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut record = self.read_all()?;
        delta.apply_to(&mut record);
        self.write_all(&record)
    }

    pub fn clear(&self) -> Result<(), StateError> {
        self.write_all(&StateRecord::new())
    }
}

/// `~/.vpc_vpn_pivot`, also home of the config file and OpenVPN log.
pub fn state_dir() -> Result<PathBuf, StateError> {
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR))
        .ok_or(StateError::NoHomeDir)
}
