// ABOUTME: Configuration for the cble broker.
// ABOUTME: Loaded from TOML with defaults, then overridden by CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::allocator::{
    AllocationKind, EndpointAllocator, PortRange, DEFAULT_MAX_ATTEMPTS, DEFAULT_RANGE_LEN,
};
use crate::error::BrokerError;
use cble_grpc::{ListenAddr, ServerTlsOptions, DEFAULT_PORT};

/// TLS section of the broker config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Host to listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on. Also the base of the default port range.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listen on this Unix socket instead of TCP
    #[serde(default)]
    pub socket: Option<PathBuf>,

    /// Endpoint kind handed to providers
    #[serde(default)]
    pub allocation: AllocationKind,

    /// First port of the provider range (defaults to port + 1)
    #[serde(default)]
    pub port_range_start: Option<u16>,

    /// Number of ports in the provider range
    #[serde(default = "default_range_len")]
    pub port_range_len: u32,

    /// Draws before a registration fails with exhaustion
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Fixed RNG seed, for reproducible allocation
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_range_len() -> u32 {
    u32::from(DEFAULT_RANGE_LEN)
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            socket: None,
            allocation: AllocationKind::default(),
            port_range_start: None,
            port_range_len: default_range_len(),
            max_attempts: default_max_attempts(),
            seed: None,
            tls: TlsConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: BrokerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load an explicit config file, or the default one if it exists, or defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/cble/broker.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("cble");
        Ok(config_dir.join("broker.toml"))
    }

    pub fn listen_addr(&self) -> ListenAddr {
        match &self.socket {
            Some(path) => ListenAddr::unix(path),
            None => ListenAddr::tcp(self.host.clone(), self.port),
        }
    }

    /// Provider port range. Ports are drawn above `port` even when
    /// listening on a socket.
    pub fn port_range(&self) -> Result<PortRange, BrokerError> {
        let range = match self.port_range_start {
            Some(start) => PortRange::new(start, self.port_range_len),
            None => PortRange::after(self.port, self.port_range_len),
        };
        range.map_err(|e| BrokerError::Config(e.to_string()))
    }

    /// Build the endpoint allocator described by this config.
    pub fn allocator(&self) -> Result<EndpointAllocator, BrokerError> {
        let allocator = match self.allocation {
            AllocationKind::Port => {
                if self.max_attempts == 0 {
                    return Err(BrokerError::Config(
                        "max_attempts must be at least 1".to_string(),
                    ));
                }
                EndpointAllocator::port_range(self.port_range()?)
                    .with_max_attempts(self.max_attempts)
            }
            AllocationKind::Socket => EndpointAllocator::identifier(),
        };
        Ok(match self.seed {
            Some(seed) => allocator.with_seed(seed),
            None => allocator,
        })
    }

    pub fn tls_options(&self) -> ServerTlsOptions {
        ServerTlsOptions {
            enabled: self.tls.enabled,
            cert_file: self.tls.cert_file.clone(),
            key_file: self.tls.key_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.port, 50051);
        assert!(!config.tls.enabled);
        assert_eq!(config.allocation, AllocationKind::Port);
        assert_eq!(config.listen_addr().to_string(), "localhost:50051");

        let range = config.port_range().unwrap();
        assert_eq!(range.start(), 50052);
        assert_eq!(range.len(), 1000);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            host = "0.0.0.0"
            port = 6000
            allocation = "socket"
            seed = 17

            [tls]
            enabled = true
            cert_file = "/etc/cble/cert.pem"
            key_file = "/etc/cble/key.pem"
        "#
        )
        .unwrap();

        let config = BrokerConfig::load(file.path()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 6000);
        assert_eq!(config.allocation, AllocationKind::Socket);
        assert_eq!(config.seed, Some(17));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(config.tls_options().validate().is_ok());
        assert_eq!(config.allocator().unwrap().kind(), AllocationKind::Socket);
    }

    #[test]
    fn test_explicit_port_range() {
        let config = BrokerConfig {
            port_range_start: Some(7000),
            port_range_len: 5,
            ..Default::default()
        };
        let range = config.port_range().unwrap();
        assert!(range.contains(7004));
        assert!(!range.contains(7005));
    }

    #[test]
    fn test_invalid_port_range_rejected() {
        let config = BrokerConfig {
            port_range_start: Some(65530),
            port_range_len: 100,
            ..Default::default()
        };
        let err = config.allocator().unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)), "{err}");
    }

    #[test]
    fn test_range_len_applies_without_explicit_start() {
        let config: BrokerConfig = toml::from_str("port_range_len = 5").unwrap();
        let range = config.port_range().unwrap();
        assert_eq!(range.start(), 50052);
        assert_eq!(range.len(), 5);
        assert!(range.contains(50056));
        assert!(!range.contains(50057));

        // Still truncated at the top of the port space
        let config = BrokerConfig {
            port: 65530,
            port_range_len: 100,
            ..Default::default()
        };
        assert_eq!(config.port_range().unwrap().len(), 5);
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let config = BrokerConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let err = config.allocator().unwrap_err();
        assert!(matches!(err, BrokerError::Config(ref msg) if msg.contains("max_attempts")), "{err}");

        // Socket allocation never draws ports
        let config = BrokerConfig {
            max_attempts: 0,
            allocation: AllocationKind::Socket,
            ..Default::default()
        };
        assert!(config.allocator().is_ok());
    }

    #[test]
    fn test_socket_listen_keeps_port_range() {
        let config = BrokerConfig {
            socket: Some(PathBuf::from("/tmp/cble-server")),
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), ListenAddr::unix("/tmp/cble-server"));
        assert_eq!(config.port_range().unwrap().start(), 50052);
    }

    #[test]
    fn test_malformed_config_fails() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        let err = BrokerConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("broker.toml");

        let config = BrokerConfig {
            port: 9000,
            seed: Some(3),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(BrokerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BrokerConfig::load_or_default(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
