// ABOUTME: DefaultBroker, the production Broker implementation.
// ABOUTME: Negotiates versions on handshake and manages registrations through the registry.

use std::sync::Arc;

use cble_grpc::VersionNegotiator;
use cble_proto::registration_reply;
use cble_proto::{
    HandshakeReply, HandshakeRequest, RegistrationReply, RegistrationRequest, RpcStatus,
    UnregistrationReply, UnregistrationRequest,
};
use tonic::Status;
use tracing::{debug, warn};

use super::Broker;
use crate::allocator::Endpoint;
use crate::registry::{ProviderKey, ProviderRegistry, Unregistration};

/// Broker backed by a shared `ProviderRegistry`.
pub struct DefaultBroker {
    negotiator: VersionNegotiator,
    registry: Arc<ProviderRegistry>,
}

impl DefaultBroker {
    pub fn new(negotiator: VersionNegotiator, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            negotiator,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}

fn endpoint_to_wire(endpoint: Endpoint) -> registration_reply::Endpoint {
    match endpoint {
        Endpoint::Port(port) => registration_reply::Endpoint::Port(i32::from(port)),
        Endpoint::Socket(id) => registration_reply::Endpoint::SocketId(id),
    }
}

#[tonic::async_trait]
impl Broker for DefaultBroker {
    async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeReply, Status> {
        let server_version = self.negotiator.negotiate(&request.client_version)?;
        Ok(HandshakeReply {
            server_version: server_version.to_string(),
        })
    }

    async fn register_provider(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationReply, Status> {
        let RegistrationRequest {
            name,
            version,
            id,
            features,
        } = request;
        let key = ProviderKey::new(name, version);
        debug!(provider = %key, features = ?features, "Registration request");

        let endpoint = self
            .registry
            .register(key.clone(), id, features.into_iter().collect())
            .await
            .map_err(|e| {
                warn!(provider = %key, error = %e, "Registration rejected");
                Status::from(e)
            })?;

        Ok(RegistrationReply {
            status: RpcStatus::Success as i32,
            endpoint: Some(endpoint_to_wire(endpoint)),
        })
    }

    async fn unregister_provider(
        &self,
        request: UnregistrationRequest,
    ) -> Result<UnregistrationReply, Status> {
        let key = ProviderKey::new(request.name, request.version);
        let status = match self.registry.unregister(&key, &request.id).await {
            Unregistration::Removed => RpcStatus::Success,
            Unregistration::NotFound => RpcStatus::Failure,
        };
        Ok(UnregistrationReply {
            status: status as i32,
        })
    }
}
