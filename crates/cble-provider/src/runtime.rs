// ABOUTME: Full provider lifecycle against a broker.
// ABOUTME: Register, serve on the assigned endpoint until cancelled, then unregister.

use cble_broker::{BrokerClient, Endpoint};
use cble_grpc::{CancellationToken, ChannelConfig, ServerTlsOptions};
use tracing::{error, info, warn};

use crate::error::ProviderError;
use crate::server::{listen_addr_for, ProviderServer, DEFAULT_PROVIDER_HOST};
use crate::service::Provider;

/// Identity and settings a provider registers with.
#[derive(Debug, Clone)]
pub struct ProviderRuntime {
    name: String,
    version: String,
    id: String,
    features: Vec<String>,
    broker: ChannelConfig,
    host: String,
    tls: ServerTlsOptions,
}

impl ProviderRuntime {
    /// `id` is the secret presented at registration and again to unregister.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        id: impl Into<String>,
        broker: ChannelConfig,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            id: id.into(),
            features: Vec::new(),
            broker,
            host: DEFAULT_PROVIDER_HOST.to_string(),
            tls: ServerTlsOptions::disabled(),
        }
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Host to listen on when the broker assigns a port.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_tls(mut self, tls: ServerTlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Register with the broker and bind the assigned endpoint.
    ///
    /// If binding fails the registration is withdrawn before returning.
    pub async fn register<P: Provider>(
        self,
        provider: P,
    ) -> Result<RegisteredProvider<P>, ProviderError> {
        self.tls.validate()?;

        let mut broker = BrokerClient::connect(&self.broker).await?;
        let endpoint = broker
            .register(&self.name, &self.version, &self.id, &self.features)
            .await?;

        let listen = listen_addr_for(&endpoint, &self.host);
        let server = match ProviderServer::bind(provider, listen, self.tls.clone()).await {
            Ok(server) => server,
            Err(e) => {
                if let Err(unregister_err) =
                    broker.unregister(&self.name, &self.version, &self.id).await
                {
                    error!(error = %unregister_err, "Failed to withdraw registration after bind failure");
                }
                return Err(e);
            }
        };

        Ok(RegisteredProvider {
            runtime: self,
            broker,
            endpoint,
            server,
        })
    }

    /// Register, serve until `shutdown` is cancelled, then unregister.
    pub async fn run<P: Provider>(
        self,
        provider: P,
        shutdown: CancellationToken,
    ) -> Result<(), ProviderError> {
        self.register(provider).await?.serve(shutdown).await
    }
}

/// A provider registered with the broker and bound to its endpoint.
pub struct RegisteredProvider<P> {
    runtime: ProviderRuntime,
    broker: BrokerClient,
    endpoint: Endpoint,
    server: ProviderServer<P>,
}

impl<P: Provider> RegisteredProvider<P> {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serve until `shutdown` is cancelled, then unregister with the same identity.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ProviderError> {
        let RegisteredProvider {
            runtime,
            mut broker,
            endpoint,
            server,
        } = self;
        let key = format!("{}@{}", runtime.name, runtime.version);
        info!(provider = %key, endpoint = %endpoint, "Provider serving");

        let served = server.serve(shutdown).await;

        let removed = broker
            .unregister(&runtime.name, &runtime.version, &runtime.id)
            .await;
        served?;
        if !removed? {
            warn!(provider = %key, "Broker had no matching registration");
            return Err(ProviderError::NotRegistered(key));
        }
        info!(provider = %key, "Provider unregistered");
        Ok(())
    }
}
