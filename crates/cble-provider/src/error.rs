// ABOUTME: Error types for the cble-provider crate.
// ABOUTME: Covers serving, dialing providers, and the broker round-trip.

use std::time::Duration;

use cble_broker::BrokerError;
use cble_grpc::GrpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Listener, TLS, or channel failure.
    #[error(transparent)]
    Grpc(#[from] GrpcError),

    /// Registering with or unregistering from the broker failed.
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    /// The provider server never answered the handshake.
    #[error("handshake failed: provider not ready after {0:?}")]
    HandshakeTimeout(Duration),

    /// The provider rejected the handshake.
    #[error("handshake failed: {0}")]
    Handshake(tonic::Status),

    /// The broker had no registration matching ours at unregister time.
    #[error("broker did not recognise registration {0}")]
    NotRegistered(String),

    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),
}
