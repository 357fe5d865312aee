// ABOUTME: Shared gRPC plumbing for the cble broker and provider processes.
// ABOUTME: Provides version negotiation, listener lifecycle, TLS options, channels, and signal handling.

pub mod addr;
pub mod channel;
pub mod error;
pub mod lifecycle;
pub mod shutdown;
pub mod tls;
pub mod version;

// Addressing
pub use addr::{provider_socket_path, ListenAddr, DEFAULT_BROKER_SOCKET, DEFAULT_PORT};

// Channel creation
pub use channel::{create_channel, ChannelConfig, ConnectTarget};

// Error types
pub use error::GrpcError;

// Listener lifecycle
pub use lifecycle::{BoundAddr, BoundLifecycle, Lifecycle, LifecycleState};

// Shutdown
pub use shutdown::{cancel_on_signal, wait_for_signal};

// TLS
pub use tls::{ClientTlsOptions, ServerTlsOptions};

// Version negotiation
pub use version::{major_version, VersionMismatch, VersionNegotiator, PROTOCOL_VERSION};

// Cancellation token used by every serve loop
pub use tokio_util::sync::CancellationToken;
