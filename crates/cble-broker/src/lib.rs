// ABOUTME: Provider registration broker for cble.
// ABOUTME: Endpoint allocation, the provider registry, the Cble gRPC service, and a broker client.

pub mod allocator;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod services;

pub use allocator::{
    AllocationError, AllocationKind, Endpoint, EndpointAllocator, PortRange, DEFAULT_MAX_ATTEMPTS,
};
pub use client::BrokerClient;
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use registry::{
    ProviderKey, ProviderRegistration, ProviderRegistry, RegistryError, Unregistration,
};
pub use server::{run, BrokerServer};
pub use services::{Broker, CbleService, DefaultBroker, UnimplementedBroker};
