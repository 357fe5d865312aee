// ABOUTME: Client for talking to a running broker.
// ABOUTME: Connects over TCP or a Unix socket, handshakes, then registers and unregisters providers.

use cble_grpc::{create_channel, ChannelConfig, GrpcError, PROTOCOL_VERSION};
use cble_proto::client::CbleClient;
use cble_proto::{
    registration_reply, HandshakeRequest, RegistrationRequest, RpcStatus, UnregistrationRequest,
};
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::allocator::Endpoint;
use crate::error::BrokerError;

/// Handshaken connection to a broker.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    inner: CbleClient<Channel>,
    server_version: String,
}

impl BrokerClient {
    /// Dial the broker and perform the version handshake.
    ///
    /// The connection fails if the broker rejects our major version.
    pub async fn connect(config: &ChannelConfig) -> Result<Self, BrokerError> {
        let channel = create_channel(config).await?;
        Self::from_channel(channel).await
    }

    /// Handshake over an existing channel.
    pub async fn from_channel(channel: Channel) -> Result<Self, BrokerError> {
        Self::handshake_with(channel, PROTOCOL_VERSION).await
    }

    /// Handshake presenting `client_version` instead of our own.
    pub async fn handshake_with(
        channel: Channel,
        client_version: &str,
    ) -> Result<Self, BrokerError> {
        let mut inner = CbleClient::new(channel);
        let reply = inner
            .handshake(HandshakeRequest {
                client_version: client_version.to_string(),
            })
            .await
            .map_err(|status| {
                if status.code() == tonic::Code::FailedPrecondition {
                    BrokerError::Grpc(GrpcError::HandshakeFailed(status.message().to_string()))
                } else {
                    BrokerError::from(status)
                }
            })?
            .into_inner();
        debug!(server_version = %reply.server_version, "Broker handshake complete");
        Ok(Self {
            inner,
            server_version: reply.server_version,
        })
    }

    /// Version the broker reported during the handshake.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Register a provider and return the endpoint it must serve on.
    pub async fn register(
        &mut self,
        name: &str,
        version: &str,
        id: &str,
        features: &[String],
    ) -> Result<Endpoint, BrokerError> {
        let reply = self
            .inner
            .register_provider(RegistrationRequest {
                name: name.to_string(),
                version: version.to_string(),
                id: id.to_string(),
                features: features.to_vec(),
            })
            .await?
            .into_inner();

        if reply.status() != RpcStatus::Success {
            return Err(BrokerError::Failure);
        }
        let endpoint = match reply.endpoint {
            Some(registration_reply::Endpoint::Port(port)) => u16::try_from(port)
                .map(Endpoint::Port)
                .map_err(|_| BrokerError::Protocol(format!("port out of range: {}", port)))?,
            Some(registration_reply::Endpoint::SocketId(id)) => Endpoint::Socket(id),
            None => {
                return Err(BrokerError::Protocol(
                    "registration reply carried no endpoint".to_string(),
                ))
            }
        };
        info!(name, version, endpoint = %endpoint, "Registered with broker");
        Ok(endpoint)
    }

    /// Remove a registration. `Ok(false)` means the broker had no
    /// registration matching `name`, `version`, and `id`.
    pub async fn unregister(
        &mut self,
        name: &str,
        version: &str,
        id: &str,
    ) -> Result<bool, BrokerError> {
        let reply = self
            .inner
            .unregister_provider(UnregistrationRequest {
                name: name.to_string(),
                version: version.to_string(),
                id: id.to_string(),
            })
            .await?
            .into_inner();
        Ok(reply.status() == RpcStatus::Success)
    }
}
