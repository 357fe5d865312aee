// ABOUTME: Listening addresses for the broker and provider servers.
// ABOUTME: TCP host:port or a filesystem-backed Unix socket path.

use std::fmt;
use std::path::{Path, PathBuf};

/// Default broker TCP port.
pub const DEFAULT_PORT: u16 = 50051;

/// Default broker Unix socket path.
pub const DEFAULT_BROKER_SOCKET: &str = "/tmp/cble-server";

/// Socket path a provider listens on for the given socket identifier.
pub fn provider_socket_path(socket_id: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/cble-provider-grpc-{}", socket_id))
}

/// Where a server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// TCP `host:port`.
    Tcp { host: String, port: u16 },
    /// Local socket at a filesystem path.
    Unix(PathBuf),
}

impl ListenAddr {
    /// TCP listener on `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ListenAddr::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Local socket listener at `path`.
    pub fn unix(path: impl AsRef<Path>) -> Self {
        ListenAddr::Unix(path.as_ref().to_path_buf())
    }

    /// The TCP port, if this is a TCP address.
    pub fn port(&self) -> Option<u16> {
        match self {
            ListenAddr::Tcp { port, .. } => Some(*port),
            ListenAddr::Unix(_) => None,
        }
    }
}

impl Default for ListenAddr {
    fn default() -> Self {
        ListenAddr::tcp("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp { host, port } => write!(f, "{}:{}", host, port),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
