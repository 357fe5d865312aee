// ABOUTME: Serves a Provider on the endpoint the broker assigned.
// ABOUTME: Ports map to TCP on the provider host, socket ids to /tmp/cble-provider-grpc-<id>.

use cble_broker::Endpoint;
use cble_grpc::{
    provider_socket_path, BoundAddr, BoundLifecycle, CancellationToken, Lifecycle,
    LifecycleState, ListenAddr, ServerTlsOptions,
};
use tokio::sync::watch;
use tracing::info;

use crate::error::ProviderError;
use crate::service::{Provider, ProviderService};

/// Host providers listen on for port endpoints.
pub const DEFAULT_PROVIDER_HOST: &str = "localhost";

/// Where a provider listens for a given endpoint.
pub fn listen_addr_for(endpoint: &Endpoint, host: &str) -> ListenAddr {
    match endpoint {
        Endpoint::Port(port) => ListenAddr::tcp(host, *port),
        Endpoint::Socket(id) => ListenAddr::unix(provider_socket_path(id)),
    }
}

/// A provider bound to its listener but not yet serving.
pub struct ProviderServer<P> {
    lifecycle: BoundLifecycle,
    service: ProviderService<P>,
}

impl<P: Provider> ProviderServer<P> {
    pub async fn bind(
        provider: P,
        listen: ListenAddr,
        tls: ServerTlsOptions,
    ) -> Result<Self, ProviderError> {
        let lifecycle = Lifecycle::new(listen, tls).bind().await?;
        Ok(Self {
            lifecycle,
            service: ProviderService::new(provider),
        })
    }

    pub fn local_addr(&self) -> Result<BoundAddr, ProviderError> {
        Ok(self.lifecycle.local_addr()?)
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Serve until `shutdown` is cancelled and in-flight calls have drained.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ProviderError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Provider server starting");
        self.lifecycle
            .serve(self.service.into_routes(), shutdown)
            .await?;
        Ok(())
    }
}

/// Bind and serve `provider` on `endpoint` until `shutdown` is cancelled.
pub async fn serve<P: Provider>(
    provider: P,
    endpoint: &Endpoint,
    tls: ServerTlsOptions,
    shutdown: CancellationToken,
) -> Result<(), ProviderError> {
    let listen = listen_addr_for(endpoint, DEFAULT_PROVIDER_HOST);
    ProviderServer::bind(provider, listen, tls)
        .await?
        .serve(shutdown)
        .await
}
