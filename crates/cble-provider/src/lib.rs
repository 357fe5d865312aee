// ABOUTME: SDK for cble provider processes.
// ABOUTME: Implement Provider, then register and serve through ProviderRuntime.

pub mod client;
pub mod error;
pub mod runtime;
pub mod server;
pub mod service;

pub use client::{channel_config_for, ProviderClient, HANDSHAKE_TIMEOUT};
pub use error::ProviderError;
pub use runtime::{ProviderRuntime, RegisteredProvider};
pub use server::{listen_addr_for, serve, ProviderServer, DEFAULT_PROVIDER_HOST};
pub use service::{DefaultProvider, Provider, ProviderService};

// Message types provider implementations build replies from
pub use cble_proto::{
    ConfigureRequest, DeployReply, DeployRequest, DestroyReply, DestroyRequest, GetConsoleReply,
    GetConsoleRequest, ProviderFeature, RpcStatus, RpcStatusReply,
};
pub use prost_types::{value::Kind, Struct, Value};
