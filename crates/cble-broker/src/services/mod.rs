// ABOUTME: gRPC service layer for the broker.
// ABOUTME: Broker trait, its tonic adapter, and the default implementation.

mod broker;
mod default;

pub use broker::{Broker, CbleService, UnimplementedBroker};
pub use default::DefaultBroker;
