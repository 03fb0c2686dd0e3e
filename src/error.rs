//! Error kinds surfaced by the pivot commands

use crate::aws::{ApiError, ProfileError};
use crate::config::ConfigError;
use crate::openvpn::ClientError;
use crate::pki::PkiError;
use crate::state::{StateError, StateKey};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("State file {path} {detail}")]
    Conflict { path: PathBuf, detail: String },
    #[error("Invalid {kind}: {value}")]
    InvalidInput { kind: &'static str, value: String },
    #[error("Credential error: {0}")]
    Credential(String),
    #[error(transparent)]
    RemoteApi(#[from] ApiError),
    #[error("{0}")]
    Subprocess(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to read {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Required state key {0} is missing")]
    MissingState(StateKey),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PivotError>,
    },
}

impl PivotError {
    pub fn stage(stage: &'static str, source: PivotError) -> Self {
        PivotError::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping stage context.
    pub fn root(&self) -> &PivotError {
        match self {
            PivotError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<ProfileError> for PivotError {
    fn from(err: ProfileError) -> Self {
        PivotError::Credential(err.to_string())
    }
}

impl From<PkiError> for PivotError {
    fn from(err: PkiError) -> Self {
        PivotError::Subprocess(err.to_string())
    }
}

impl From<ClientError> for PivotError {
    fn from(err: ClientError) -> Self {
        PivotError::Subprocess(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_includes_remote_code() {
        let api = ApiError::new(
            "CreateClientVpnEndpoint",
            "InvalidParameterValue",
            "bad cidr",
            400,
        );
        let err = PivotError::stage("create-endpoint", api.into());
        assert_eq!(
            err.to_string(),
            "create-endpoint failed: CreateClientVpnEndpoint failed [InvalidParameterValue]: bad cidr"
        );
        assert!(matches!(err.root(), PivotError::RemoteApi(_)));
    }

    #[test]
    fn test_profile_error_is_credential() {
        let err: PivotError = ProfileError::NotFound("pentest".to_string()).into();
        assert!(matches!(err, PivotError::Credential(_)));
        assert!(err.to_string().contains("pentest"));
    }

    #[test]
    fn test_pki_error_is_subprocess() {
        let err: PivotError = PkiError::MissingOutput(PathBuf::from("/tmp/ca.crt")).into();
        assert!(matches!(err, PivotError::Subprocess(_)));
    }

    #[test]
    fn test_missing_state_names_key() {
        let err = PivotError::MissingState(StateKey::VpnEndpointId);
        assert_eq!(err.to_string(), "Required state key vpnEndpointId is missing");
    }
}
