// ABOUTME: Broker server setup and lifecycle.
// ABOUTME: Wires config, registry, and broker service onto a bound listener.

use std::sync::Arc;

use anyhow::{Context, Result};
use cble_grpc::{
    BoundAddr, BoundLifecycle, CancellationToken, Lifecycle, LifecycleState, ListenAddr,
    ServerTlsOptions, VersionNegotiator,
};
use tokio::sync::watch;
use tracing::info;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::registry::ProviderRegistry;
use crate::services::{Broker, CbleService, DefaultBroker};

/// A broker bound to its listener but not yet serving.
pub struct BrokerServer<B> {
    lifecycle: BoundLifecycle,
    service: CbleService<B>,
}

impl BrokerServer<DefaultBroker> {
    /// Build the default broker described by `config` and bind its listener.
    pub async fn bind(config: &BrokerConfig) -> Result<Self> {
        let allocator = config.allocator().context("building endpoint allocator")?;
        let registry = Arc::new(ProviderRegistry::new(allocator));
        let broker = DefaultBroker::new(VersionNegotiator::default(), registry);

        let server = Self::bind_with(broker, config.listen_addr(), config.tls_options())
            .await
            .with_context(|| format!("binding broker on {}", config.listen_addr()))?;
        Ok(server)
    }

    /// The registry shared with the serving broker.
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        self.service.broker().registry().clone()
    }
}

impl<B: Broker> BrokerServer<B> {
    /// Bind any broker implementation.
    pub async fn bind_with(
        broker: B,
        listen: ListenAddr,
        tls: ServerTlsOptions,
    ) -> Result<Self, BrokerError> {
        let lifecycle = Lifecycle::new(listen, tls).bind().await?;
        Ok(Self {
            lifecycle,
            service: CbleService::new(broker),
        })
    }

    pub fn local_addr(&self) -> Result<BoundAddr, BrokerError> {
        Ok(self.lifecycle.local_addr()?)
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    pub fn broker(&self) -> Arc<B> {
        self.service.broker()
    }

    /// Serve until `shutdown` is cancelled and in-flight calls have drained.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        self.lifecycle
            .serve(self.service.into_routes(), shutdown)
            .await?;
        Ok(())
    }
}

/// Run the broker until `shutdown` fires.
pub async fn run(config: &BrokerConfig, shutdown: CancellationToken) -> Result<()> {
    info!("Starting cble broker");
    info!("  Listen address: {}", config.listen_addr());
    info!("  Allocation: {:?}", config.allocation);
    info!("  TLS: {}", config.tls.enabled);

    let server = BrokerServer::bind(config).await?;
    let addr = server.local_addr()?;
    info!(addr = %addr, "Broker listening");

    server.serve(shutdown).await.context("running broker")?;
    Ok(())
}
