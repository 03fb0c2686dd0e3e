//! Named AWS profiles
//!
//! Credentials come from `~/.aws/credentials` (`[name]` sections) and the
//! region from `~/.aws/config` (`[default]` / `[profile name]` sections),
//! the same files the AWS CLI uses.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Cannot determine the home directory")]
    NoHomeDir,
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Profile '{0}' not found in the AWS credentials file")]
    NotFound(String),
    #[error("Profile '{profile}' has no {key}")]
    MissingKey { profile: String, key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// A profile resolved to credentials plus a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsProfile {
    pub name: String,
    pub region: String,
    pub credentials: Credentials,
}

type IniSections = HashMap<String, HashMap<String, String>>;

impl AwsProfile {
    /// Load `name` from the shared AWS files.
    ///
    /// Region precedence: `AWS_REGION`, `AWS_DEFAULT_REGION`, the profile's
    /// `region`, then `default_region`.
    pub fn load(name: &str, default_region: &str) -> Result<Self, ProfileError> {
        let credentials_path = shared_file("AWS_SHARED_CREDENTIALS_FILE", "credentials")?;
        let config_path = shared_file("AWS_CONFIG_FILE", "config")?;
        debug!(
            "Loading profile '{}' from {}",
            name,
            credentials_path.display()
        );

        let credentials = fs::read_to_string(&credentials_path).map_err(|source| {
            ProfileError::Read {
                path: credentials_path.clone(),
                source,
            }
        })?;
        // A missing config file only means no region is configured there
        let config = fs::read_to_string(&config_path).unwrap_or_default();

        let env_region = env::var("AWS_REGION")
            .or_else(|_| env::var("AWS_DEFAULT_REGION"))
            .ok()
            .filter(|r| !r.is_empty());

        Self::from_contents(name, &credentials, &config, env_region, default_region)
    }

    pub fn from_contents(
        name: &str,
        credentials: &str,
        config: &str,
        env_region: Option<String>,
        default_region: &str,
    ) -> Result<Self, ProfileError> {
        let credential_sections = parse_ini(credentials);
        let section = credential_sections
            .get(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))?;

        let required = |key: &'static str| {
            section
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| ProfileError::MissingKey {
                    profile: name.to_string(),
                    key,
                })
        };

        let credentials = Credentials {
            access_key_id: required("aws_access_key_id")?,
            secret_access_key: required("aws_secret_access_key")?,
            session_token: section.get("aws_session_token").cloned(),
        };

        let config_sections = parse_ini(config);
        let config_section_name = if name == "default" {
            "default".to_string()
        } else {
            format!("profile {}", name)
        };
        let profile_region = config_sections
            .get(&config_section_name)
            .and_then(|s| s.get("region"))
            .or_else(|| section.get("region"))
            .cloned();

        let region = env_region
            .or(profile_region)
            .unwrap_or_else(|| default_region.to_string());

        Ok(Self {
            name: name.to_string(),
            region,
            credentials,
        })
    }
}

fn shared_file(env_var: &str, file_name: &str) -> Result<PathBuf, ProfileError> {
    if let Ok(path) = env::var(env_var) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(ProfileError::NoHomeDir)?;
    Ok(home.join(".aws").join(file_name))
}

fn parse_ini(content: &str) -> IniSections {
    let mut sections = IniSections::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    sections
}
