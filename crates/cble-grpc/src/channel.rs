// ABOUTME: gRPC channel creation over TCP or a local Unix socket, with optional TLS.
// ABOUTME: Used by the broker client, the provider client, and the CLI.

use std::path::PathBuf;
use std::time::Duration;

use hyper_util::rt::TokioIo;
#[cfg(unix)]
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use crate::error::GrpcError;
use crate::tls::ClientTlsOptions;

/// Where a client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// `host:port` or a full `http(s)://host:port` URL.
    Tcp(String),
    /// Local socket path.
    Unix(PathBuf),
}

/// Configuration for creating a gRPC channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub target: ConnectTarget,
    pub tls: ClientTlsOptions,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
}

impl ChannelConfig {
    /// Plaintext channel to a TCP address.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            target: ConnectTarget::Tcp(address.into().trim().to_string()),
            tls: ClientTlsOptions::disabled(),
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Plaintext channel to a local socket.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            target: ConnectTarget::Unix(path.into()),
            tls: ClientTlsOptions::disabled(),
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Set TLS options.
    pub fn with_tls(mut self, tls: ClientTlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// URI handed to tonic. Unix sockets get a placeholder authority.
    fn uri(&self) -> String {
        let scheme = if self.tls.enabled { "https" } else { "http" };
        match &self.target {
            ConnectTarget::Tcp(addr) => format!("{}://{}", scheme, strip_scheme(addr)),
            ConnectTarget::Unix(_) => format!("{}://localhost", scheme),
        }
    }
}

/// Drop a leading `http://` or `https://`, matched case-insensitively.
fn strip_scheme(addr: &str) -> &str {
    for prefix in ["http://", "https://"] {
        if addr
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            return &addr[prefix.len()..];
        }
    }
    addr
}

/// Create a gRPC channel with the specified configuration.
///
/// TLS material is validated and loaded before dialing.
pub async fn create_channel(config: &ChannelConfig) -> Result<Channel, GrpcError> {
    let tls = config.tls.load()?;

    let mut endpoint = Endpoint::from_shared(config.uri())
        .map_err(|e| GrpcError::InvalidAddress(e.to_string()))?;

    if let Some(tls) = tls {
        endpoint = endpoint
            .tls_config(tls)
            .map_err(|e| GrpcError::Config(format!("TLS config error: {}", e)))?;
    }

    if let Some(timeout) = config.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }

    let channel = match &config.target {
        ConnectTarget::Tcp(_) => endpoint.connect().await?,
        #[cfg(unix)]
        ConnectTarget::Unix(path) => {
            let path = path.clone();
            endpoint
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
                }))
                .await?
        }
        #[cfg(not(unix))]
        ConnectTarget::Unix(path) => {
            return Err(GrpcError::InvalidAddress(format!(
                "local sockets are not supported on this platform: {}",
                path.display()
            )))
        }
    };

    tracing::debug!(
        target_addr = ?config.target,
        use_tls = config.tls.enabled,
        "gRPC channel connected"
    );

    Ok(channel)
}
