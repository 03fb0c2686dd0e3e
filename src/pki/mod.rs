//! Certificate material for the Client VPN endpoint
//!
//! The endpoint authenticates clients with mutual TLS, so create needs a CA,
//! a server certificate and a client certificate. `CertificateAuthority`
//! produces the five PEM files; `easyrsa` is the implementation used by the
//! CLI.

pub mod easyrsa;

pub use easyrsa::EasyRsa;

use crate::state::{StateDelta, StateKey, StateRecord};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Archive {0} does not contain an easyrsa script")]
    MissingScript(PathBuf),
    #[error("The \"{command}\" command failed ({status})\n{stdout}\n{stderr}")]
    Command {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("Expected certificate file {0} was not created")]
    MissingOutput(PathBuf),
}

/// The five files the VPN endpoint and client need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl CertificatePaths {
    /// Standard EasyRSA layout under `pki_dir`.
    pub fn in_pki(pki_dir: &Path, client_name: &str) -> Self {
        Self {
            ca_cert: pki_dir.join("ca.crt"),
            server_cert: pki_dir.join("issued").join("server.crt"),
            server_key: pki_dir.join("private").join("server.key"),
            client_cert: pki_dir.join("issued").join(format!("{}.crt", client_name)),
            client_key: pki_dir.join("private").join(format!("{}.key", client_name)),
        }
    }

    /// Paths recorded by an earlier run, if all five are present.
    pub fn from_record(record: &StateRecord) -> Option<Self> {
        let path = |key| record.text(key).map(PathBuf::from);
        Some(Self {
            ca_cert: path(StateKey::CaCertPath)?,
            server_cert: path(StateKey::ServerCertPath)?,
            server_key: path(StateKey::ServerKeyPath)?,
            client_cert: path(StateKey::ClientCertPath)?,
            client_key: path(StateKey::ClientKeyPath)?,
        })
    }

    pub fn all(&self) -> [&Path; 5] {
        [
            &self.ca_cert,
            &self.server_cert,
            &self.server_key,
            &self.client_cert,
            &self.client_key,
        ]
    }

    pub fn all_exist(&self) -> bool {
        self.all().iter().all(|p| p.is_file())
    }

    pub fn first_missing(&self) -> Option<&Path> {
        self.all().into_iter().find(|p| !p.is_file())
    }

    pub fn to_delta(&self) -> StateDelta {
        StateDelta::new()
            .set(StateKey::CaCertPath, self.ca_cert.as_path())
            .set(StateKey::ServerCertPath, self.server_cert.as_path())
            .set(StateKey::ServerKeyPath, self.server_key.as_path())
            .set(StateKey::ClientCertPath, self.client_cert.as_path())
            .set(StateKey::ClientKeyPath, self.client_key.as_path())
    }
}

/// Something that can mint the VPN certificate set.
#[allow(async_fn_in_trait)]
pub trait CertificateAuthority {
    /// Create a fresh CA plus server and client certificates.
    async fn generate(&self) -> Result<CertificatePaths, PkiError>;

    /// Remove local CA material. Missing files are not an error.
    fn cleanup(&self) -> Result<(), PkiError>;
}
