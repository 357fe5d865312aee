// ABOUTME: Re-exports generated protobuf types for the cble protocol.
// ABOUTME: Single source of truth for broker/provider gRPC services and message types.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Generated protobuf types for the cble protocol.
pub mod cble {
    tonic::include_proto!("cble");
}

// Re-export commonly used types at crate root for convenience
pub use cble::*;

// Re-export client types under a client module
pub mod client {
    pub use super::cble::cble_client::CbleClient;
    pub use super::cble::provider_client::ProviderClient;
}

// Re-export server types under a server module
pub mod server {
    pub use super::cble::cble_server::{Cble, CbleServer};
    pub use super::cble::provider_server::{Provider, ProviderServer};
}
