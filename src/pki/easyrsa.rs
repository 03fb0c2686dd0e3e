//! EasyRSA-backed certificate authority
//!
//! Downloads the EasyRSA release tarball, unpacks it into the work
//! directory and runs four batch commands to build a CA, a server
//! certificate and a client certificate, all without passphrases.

use crate::config::PkiConfig;
use crate::pki::{CertificateAuthority, CertificatePaths, PkiError};
use flate2::read::GzDecoder;
use std::fs;
use std::io;
use std::path::PathBuf;
use tar::Archive;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SERVER_NAME: &str = "server";
const CLIENT_NAME: &str = "client.domain.tld";

#[derive(Debug, Clone)]
pub struct EasyRsa {
    url: String,
    work_dir: PathBuf,
}

impl EasyRsa {
    pub fn new(config: &PkiConfig) -> Self {
        Self {
            url: config.easyrsa_url.clone(),
            work_dir: config.work_dir.clone(),
        }
    }

    /// Downloaded tarball, e.g. `/tmp/EasyRSA-unix-v3.0.6.tgz`.
    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(archive_name(&self.url))
    }

    /// Unpacked release, e.g. `/tmp/EasyRSA-v3.0.6`.
    pub fn install_dir(&self) -> PathBuf {
        self.work_dir.join(install_dir_name(&archive_name(&self.url)))
    }

    pub fn pki_dir(&self) -> PathBuf {
        self.install_dir().join("pki")
    }

    async fn download(&self) -> Result<(), PkiError> {
        info!("Downloading EasyRSA from {}", self.url);
        let download_err = |e: reqwest::Error| PkiError::Download {
            url: self.url.clone(),
            message: e.to_string(),
        };

        let response = reqwest::get(&self.url).await.map_err(download_err)?;
        if !response.status().is_success() {
            return Err(PkiError::Download {
                url: self.url.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }
        let bytes = response.bytes().await.map_err(download_err)?;

        let archive = self.archive_path();
        fs::create_dir_all(&self.work_dir).map_err(|source| PkiError::Io {
            path: self.work_dir.clone(),
            source,
        })?;
        fs::write(&archive, &bytes).map_err(|source| PkiError::Io {
            path: archive.clone(),
            source,
        })?;
        debug!("Saved {} bytes to {}", bytes.len(), archive.display());
        Ok(())
    }

    fn unpack(&self) -> Result<(), PkiError> {
        let archive_path = self.archive_path();
        let io_err = |source: io::Error| PkiError::Io {
            path: archive_path.clone(),
            source,
        };

        let file = fs::File::open(&archive_path).map_err(io_err)?;
        let mut archive = Archive::new(GzDecoder::new(file));
        archive.unpack(&self.work_dir).map_err(io_err)?;

        if !self.install_dir().join("easyrsa").is_file() {
            return Err(PkiError::MissingScript(archive_path));
        }
        Ok(())
    }

    /// Run `./easyrsa <args>` in batch mode inside the install directory.
    async fn easyrsa(&self, args: &[&str]) -> Result<(), PkiError> {
        let command = format!("./easyrsa {}", args.join(" "));
        debug!("Running {}", command);

        let install_dir = self.install_dir();
        let output = Command::new("./easyrsa")
            .args(args)
            .current_dir(&install_dir)
            .env("EASYRSA_BATCH", "1")
            .output()
            .await
            .map_err(|source| PkiError::Io {
                path: install_dir.join("easyrsa"),
                source,
            })?;

        if !output.status.success() {
            return Err(PkiError::Command {
                command,
                status: output.status.to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn build(&self) -> Result<CertificatePaths, PkiError> {
        self.easyrsa(&["init-pki"]).await?;
        self.easyrsa(&["build-ca", "nopass"]).await?;
        self.easyrsa(&["build-server-full", SERVER_NAME, "nopass"])
            .await?;
        self.easyrsa(&["build-client-full", CLIENT_NAME, "nopass"])
            .await?;

        let paths = CertificatePaths::in_pki(&self.pki_dir(), CLIENT_NAME);
        if let Some(missing) = paths.first_missing() {
            return Err(PkiError::MissingOutput(missing.to_path_buf()));
        }
        Ok(paths)
    }
}

impl CertificateAuthority for EasyRsa {
    async fn generate(&self) -> Result<CertificatePaths, PkiError> {
        self.cleanup()?;
        self.download().await?;
        self.unpack()?;
        let paths = self.build().await?;
        info!("Created VPN certificates in {}", self.pki_dir().display());
        Ok(paths)
    }

    fn cleanup(&self) -> Result<(), PkiError> {
        let install_dir = self.install_dir();
        match fs::remove_dir_all(&install_dir) {
            Ok(()) => debug!("Removed {}", install_dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(PkiError::Io {
                    path: install_dir,
                    source,
                });
            }
        }

        let archive = self.archive_path();
        if let Err(e) = fs::remove_file(&archive) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", archive.display(), e);
            }
        }
        Ok(())
    }
}

fn archive_name(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("EasyRSA.tgz")
        .to_string()
}

// EasyRSA-unix-v3.0.6.tgz unpacks to EasyRSA-v3.0.6/
fn install_dir_name(archive_name: &str) -> String {
    let stem = archive_name
        .strip_suffix(".tgz")
        .or_else(|| archive_name.strip_suffix(".tar.gz"))
        .unwrap_or(archive_name);
    stem.replacen("-unix-", "-", 1)
}
