// ABOUTME: Transport security options for servers and clients.
// ABOUTME: Validates required material and loads PEM files before any network activity.

use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::error::GrpcError;

/// Server-side TLS settings: a certificate and key are required when enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerTlsOptions {
    pub enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl ServerTlsOptions {
    /// TLS disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// TLS enabled with the given certificate and key files.
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            cert_file: Some(cert_file.into()),
            key_file: Some(key_file.into()),
        }
    }

    /// Check that required material is configured without touching the filesystem.
    pub fn validate(&self) -> Result<(), GrpcError> {
        if !self.enabled {
            return Ok(());
        }
        match (non_empty(&self.cert_file), non_empty(&self.key_file)) {
            (Some(_), Some(_)) => Ok(()),
            _ => Err(GrpcError::Config(
                "must provide a certificate and key file if using TLS".to_string(),
            )),
        }
    }

    /// Validate and read the PEM files. Returns `None` when TLS is disabled.
    pub fn load(&self) -> Result<Option<ServerTlsConfig>, GrpcError> {
        self.validate()?;
        if !self.enabled {
            return Ok(None);
        }
        let (Some(cert_path), Some(key_path)) =
            (non_empty(&self.cert_file), non_empty(&self.key_file))
        else {
            return Ok(None);
        };
        let cert = read_pem(cert_path, "certificate")?;
        let key = read_pem(key_path, "key")?;
        Ok(Some(
            ServerTlsConfig::new().identity(Identity::from_pem(cert, key)),
        ))
    }
}

/// Client-side TLS settings: a CA file is required when enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientTlsOptions {
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
    /// Server name to verify; defaults to `localhost`.
    pub domain_name: Option<String>,
}

impl ClientTlsOptions {
    /// TLS disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// TLS enabled, trusting the given CA file.
    pub fn new(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            ca_file: Some(ca_file.into()),
            domain_name: None,
        }
    }

    /// Override the server name checked against the certificate.
    pub fn with_domain_name(mut self, domain: impl Into<String>) -> Self {
        self.domain_name = Some(domain.into());
        self
    }

    /// Check that required material is configured without touching the filesystem.
    pub fn validate(&self) -> Result<(), GrpcError> {
        if self.enabled && non_empty(&self.ca_file).is_none() {
            return Err(GrpcError::Config(
                "CA file must be provided for TLS".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and read the CA file. Returns `None` when TLS is disabled.
    pub fn load(&self) -> Result<Option<ClientTlsConfig>, GrpcError> {
        self.validate()?;
        let Some(ca_path) = non_empty(&self.ca_file).filter(|_| self.enabled) else {
            return Ok(None);
        };
        let ca = read_pem(ca_path, "CA")?;
        let domain = self
            .domain_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string());
        Ok(Some(
            ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(ca))
                .domain_name(domain),
        ))
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, GrpcError> {
    std::fs::read(path).map_err(|e| {
        GrpcError::Config(format!(
            "failed to read TLS {} file {}: {}",
            what,
            path.display(),
            e
        ))
    })
}
