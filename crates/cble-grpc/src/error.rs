// ABOUTME: Error types for the cble-grpc crate.
// ABOUTME: Structured errors for configuration, listener binding, serving, and client connections.

use thiserror::Error;

use crate::version::VersionMismatch;

/// Errors raised by the shared gRPC plumbing.
#[derive(Error, Debug)]
pub enum GrpcError {
    /// Invalid configuration detected before any network activity.
    #[error("config error: {0}")]
    Config(String),

    /// Failed to bind the listener. Never retried.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with a transport error.
    #[error("serve error: {0}")]
    Serve(String),

    /// Invalid target address format.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Failed to connect to the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer rejected our protocol version.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Major version mismatch detected locally.
    #[error(transparent)]
    VersionMismatch(#[from] VersionMismatch),
}

impl From<tonic::transport::Error> for GrpcError {
    fn from(err: tonic::transport::Error) -> Self {
        GrpcError::ConnectionFailed(err.to_string())
    }
}
