// ABOUTME: Error types for the cble-broker crate.
// ABOUTME: Wraps config, transport, and RPC failures seen by the broker and its clients.

use thiserror::Error;

use cble_grpc::GrpcError;

/// Errors surfaced by the broker server and `BrokerClient`.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Invalid broker configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Listener, TLS, or channel failure.
    #[error(transparent)]
    Grpc(#[from] GrpcError),

    /// A provider with the same name and version is already registered.
    #[error("duplicate registration: {0}")]
    Duplicate(String),

    /// The broker ran out of ports for this registration.
    #[error("allocation exhausted: {0}")]
    AllocationExhausted(String),

    /// The broker replied with FAILURE.
    #[error("broker reported failure")]
    Failure,

    /// The broker sent a reply we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Any other RPC error.
    #[error("rpc error: {0}")]
    Rpc(tonic::Status),
}

impl From<tonic::Status> for BrokerError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::AlreadyExists => BrokerError::Duplicate(status.message().to_string()),
            tonic::Code::ResourceExhausted => {
                BrokerError::AllocationExhausted(status.message().to_string())
            }
            _ => BrokerError::Rpc(status),
        }
    }
}
