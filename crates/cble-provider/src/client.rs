// ABOUTME: Client for calling a provider's gRPC server.
// ABOUTME: Waits for the provider to come up, then handshakes within a bounded time.

use std::time::Duration;

use cble_broker::Endpoint;
use cble_grpc::{
    create_channel, provider_socket_path, ChannelConfig, ClientTlsOptions, GrpcError,
    PROTOCOL_VERSION,
};
use cble_proto::client::ProviderClient as ProviderGrpcClient;
use cble_proto::{
    ConfigureRequest, DeployReply, DeployRequest, DestroyReply, DestroyRequest, GetConsoleReply,
    GetConsoleRequest, HandshakeRequest, RpcStatus,
};
use tonic::transport::Channel;
use tracing::debug;

use crate::error::ProviderError;

/// How long to wait for a provider to answer its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Channel settings for reaching the provider behind `endpoint`.
pub fn channel_config_for(endpoint: &Endpoint, host: &str, tls: ClientTlsOptions) -> ChannelConfig {
    let config = match endpoint {
        Endpoint::Port(port) => ChannelConfig::tcp(format!("{}:{}", host, port)),
        Endpoint::Socket(id) => ChannelConfig::unix(provider_socket_path(id)),
    };
    config.with_tls(tls)
}

/// Handshaken connection to a provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    inner: ProviderGrpcClient<Channel>,
    server_version: String,
}

impl ProviderClient {
    /// Connect to the provider serving `endpoint` on this host.
    pub async fn connect(endpoint: &Endpoint, tls: ClientTlsOptions) -> Result<Self, ProviderError> {
        let config = channel_config_for(endpoint, "localhost", tls);
        Self::connect_with(&config, HANDSHAKE_TIMEOUT).await
    }

    /// Keep dialing until the provider accepts a connection, then handshake.
    /// Gives up once `timeout` has elapsed.
    pub async fn connect_with(
        config: &ChannelConfig,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        config.tls.validate()?;

        let attempt = async {
            let channel = loop {
                match create_channel(config).await {
                    Ok(channel) => break channel,
                    Err(GrpcError::ConnectionFailed(e)) => {
                        debug!(target_addr = ?config.target, error = %e, "Provider not ready yet");
                        tokio::time::sleep(RETRY_INTERVAL).await;
                    }
                    Err(e) => return Err(ProviderError::Grpc(e)),
                }
            };

            let mut inner = ProviderGrpcClient::new(channel);
            let reply = inner
                .handshake(HandshakeRequest {
                    client_version: PROTOCOL_VERSION.to_string(),
                })
                .await
                .map_err(ProviderError::Handshake)?
                .into_inner();
            Ok::<_, ProviderError>((inner, reply.server_version))
        };

        let (inner, server_version) = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ProviderError::HandshakeTimeout(timeout))??;

        debug!(server_version = %server_version, "Connected to provider server");
        Ok(Self {
            inner,
            server_version,
        })
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Send provider-specific configuration. Returns whether the provider accepted it.
    pub async fn configure(&mut self, config: Vec<u8>) -> Result<bool, ProviderError> {
        let reply = self
            .inner
            .configure(ConfigureRequest { config })
            .await?
            .into_inner();
        Ok(reply.status() == RpcStatus::Success)
    }

    pub async fn deploy(&mut self, request: DeployRequest) -> Result<DeployReply, ProviderError> {
        Ok(self.inner.deploy(request).await?.into_inner())
    }

    pub async fn destroy(&mut self, request: DestroyRequest) -> Result<DestroyReply, ProviderError> {
        Ok(self.inner.destroy(request).await?.into_inner())
    }

    pub async fn get_console(
        &mut self,
        deployment_id: &str,
        resource_key: &str,
    ) -> Result<GetConsoleReply, ProviderError> {
        let reply = self
            .inner
            .get_console(GetConsoleRequest {
                deployment_id: deployment_id.to_string(),
                resource_key: resource_key.to_string(),
            })
            .await?
            .into_inner();
        Ok(reply)
    }
}
