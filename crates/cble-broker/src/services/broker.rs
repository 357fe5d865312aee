// ABOUTME: Broker service abstraction with unimplemented defaults.
// ABOUTME: CbleService adapts any Broker to the generated tonic Cble trait.

use std::sync::Arc;

use cble_proto::server::{Cble, CbleServer};
use cble_proto::{
    HandshakeReply, HandshakeRequest, RegistrationReply, RegistrationRequest,
    UnregistrationReply, UnregistrationRequest,
};
use tonic::service::Routes;
use tonic::{Request, Response, Status};

/// Operations a broker can serve.
///
/// Every method defaults to `UNIMPLEMENTED`, so a broker overrides only
/// what it supports.
#[tonic::async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn handshake(&self, _request: HandshakeRequest) -> Result<HandshakeReply, Status> {
        Err(Status::unimplemented("method Handshake not implemented"))
    }

    async fn register_provider(
        &self,
        _request: RegistrationRequest,
    ) -> Result<RegistrationReply, Status> {
        Err(Status::unimplemented("method RegisterProvider not implemented"))
    }

    async fn unregister_provider(
        &self,
        _request: UnregistrationRequest,
    ) -> Result<UnregistrationReply, Status> {
        Err(Status::unimplemented("method UnregisterProvider not implemented"))
    }
}

/// Broker that implements nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnimplementedBroker;

impl Broker for UnimplementedBroker {}

/// Exposes a `Broker` as the `Cble` gRPC service.
pub struct CbleService<B> {
    broker: Arc<B>,
}

impl<B: Broker> CbleService<B> {
    pub fn new(broker: B) -> Self {
        Self::from_arc(Arc::new(broker))
    }

    pub fn from_arc(broker: Arc<B>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> Arc<B> {
        self.broker.clone()
    }

    /// Wrap in the generated tonic server.
    pub fn into_server(self) -> CbleServer<Self> {
        CbleServer::new(self)
    }

    /// Routes ready to hand to the listener lifecycle.
    pub fn into_routes(self) -> Routes {
        Routes::new(self.into_server())
    }
}

#[tonic::async_trait]
impl<B: Broker> Cble for CbleService<B> {
    async fn handshake(
        &self,
        request: Request<HandshakeRequest>,
    ) -> Result<Response<HandshakeReply>, Status> {
        self.broker
            .handshake(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn register_provider(
        &self,
        request: Request<RegistrationRequest>,
    ) -> Result<Response<RegistrationReply>, Status> {
        self.broker
            .register_provider(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn unregister_provider(
        &self,
        request: Request<UnregistrationRequest>,
    ) -> Result<Response<UnregistrationReply>, Status> {
        self.broker
            .unregister_provider(request.into_inner())
            .await
            .map(Response::new)
    }
}
