//! Configuration handling for vpc-vpn-pivot

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const LOCAL_CONFIG_FILE: &str = "vpc-vpn-pivot.toml";
const HOME_CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub aws: AwsConfig,
    pub pki: PkiConfig,
    pub vpn: VpnConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Used when neither the environment nor the profile names a region
    pub default_region: String,
    /// Replaces every service endpoint (e.g. a LocalStack URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    pub easyrsa_url: String,
    /// Archive download and unpack location
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    pub client_cidr_candidates: Vec<String>,
    pub fallback_dns_servers: Vec<String>,
    /// Explicit path; otherwise `openvpn` is looked up on PATH
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openvpn_binary: Option<PathBuf>,
    pub startup_wait_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            endpoint_url: None,
        }
    }
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            easyrsa_url: "https://github.com/OpenVPN/easy-rsa/releases/download/v3.0.6/EasyRSA-unix-v3.0.6.tgz"
                .to_string(),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            client_cidr_candidates: vec![
                "172.20.0.0/22".to_string(),
                "172.21.0.0/22".to_string(),
                "172.22.0.0/22".to_string(),
                "172.23.0.0/22".to_string(),
            ],
            fallback_dns_servers: vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()],
            openvpn_binary: None,
            startup_wait_secs: 5,
            stop_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `./vpc-vpn-pivot.toml`, then `~/.vpc_vpn_pivot/config.toml`, then defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            debug!("Loading config from {}", local_config.display());
            return Self::load(&local_config);
        }

        if let Some(home_config) = home_config_path() {
            if home_config.exists() {
                debug!("Loading config from {}", home_config.display());
                return Self::load(&home_config);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

/// `~/.vpc_vpn_pivot/config.toml`
pub fn home_config_path() -> Option<PathBuf> {
    crate::state::state_dir()
        .ok()
        .map(|dir| dir.join(HOME_CONFIG_FILE))
}
