//! TLS configuration and certificate loading.
//!
//! Material is read once at startup, before daemonizing and before any
//! connection process drops privileges, and then shared read-only.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};

use crate::config::TlsConfig;

/// Error type for loading key and certificate.
#[derive(Debug, thiserror::Error)]
pub enum TlsMaterialError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate configured for private key {0:?}")]
    MissingCertificate(PathBuf),
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("invalid PEM in {path:?}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key and certificate rejected: {0}")]
    Rejected(#[from] rustls::Error),
}

/// Loaded key and certificate, shared by every listener and connection.
#[derive(Clone)]
pub struct TlsMaterial {
    config: Arc<ServerConfig>,
}

impl TlsMaterial {
    /// Load material when TLS is enabled; `Ok(None)` means upgrades are unavailable.
    pub fn load(config: &TlsConfig) -> Result<Option<Self>, TlsMaterialError> {
        if !config.enabled {
            tracing::info!("TLS disabled, STARTTLS upgrades unavailable");
            return Ok(None);
        }
        let cert_path = config
            .certificate_path
            .as_deref()
            .ok_or_else(|| TlsMaterialError::MissingCertificate(config.private_key_path.clone()))?;

        let material = Self::from_pem_files(cert_path, &config.private_key_path)?;
        tracing::info!(
            certificate = %cert_path.display(),
            private_key = %config.private_key_path.display(),
            "TLS material loaded"
        );
        Ok(Some(material))
    }

    /// Build server-side TLS state from PEM encoded certificate chain and key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsMaterialError> {
        let cert_file = open(cert_path)?;
        let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsMaterialError::Pem {
                path: cert_path.to_path_buf(),
                source,
            })?;
        if cert_chain.is_empty() {
            return Err(TlsMaterialError::NoCertificates(cert_path.to_path_buf()));
        }

        let key_file = open(key_path)?;
        let key = private_key(&mut BufReader::new(key_file))
            .map_err(|source| TlsMaterialError::Pem {
                path: key_path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| TlsMaterialError::NoPrivateKey(key_path.to_path_buf()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)?;

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Shared rustls server configuration.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial").finish_non_exhaustive()
    }
}

fn open(path: &Path) -> Result<File, TlsMaterialError> {
    File::open(path).map_err(|source| TlsMaterialError::Read {
        path: path.to_path_buf(),
        source,
    })
}
