// ABOUTME: Provider service abstraction and its tonic adapter.
// ABOUTME: Handshake performs the version check by default; workload methods default to UNIMPLEMENTED.

use std::sync::Arc;

use cble_grpc::VersionNegotiator;
use cble_proto::server::{Provider as ProviderRpc, ProviderServer};
use cble_proto::{
    ConfigureRequest, DeployReply, DeployRequest, DestroyReply, DestroyRequest, GetConsoleReply,
    GetConsoleRequest, HandshakeReply, HandshakeRequest, RpcStatusReply,
};
use tonic::service::Routes;
use tonic::{Request, Response, Status};

/// A provider implementation.
///
/// Override the workload methods you support. The default `handshake`
/// accepts any client with our major version.
#[tonic::async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeReply, Status> {
        let negotiator = VersionNegotiator::default();
        let server_version = negotiator.negotiate(&request.client_version)?;
        Ok(HandshakeReply {
            server_version: server_version.to_string(),
        })
    }

    async fn configure(&self, _request: ConfigureRequest) -> Result<RpcStatusReply, Status> {
        Err(Status::unimplemented("method Configure not implemented"))
    }

    async fn deploy(&self, _request: DeployRequest) -> Result<DeployReply, Status> {
        Err(Status::unimplemented("method Deploy not implemented"))
    }

    async fn destroy(&self, _request: DestroyRequest) -> Result<DestroyReply, Status> {
        Err(Status::unimplemented("method Destroy not implemented"))
    }

    async fn get_console(&self, _request: GetConsoleRequest) -> Result<GetConsoleReply, Status> {
        Err(Status::unimplemented("method GetConsole not implemented"))
    }
}

/// Provider that only answers the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProvider;

impl Provider for DefaultProvider {}

/// Exposes a `Provider` as the `Provider` gRPC service.
pub struct ProviderService<P> {
    provider: Arc<P>,
}

impl<P: Provider> ProviderService<P> {
    pub fn new(provider: P) -> Self {
        Self::from_arc(Arc::new(provider))
    }

    pub fn from_arc(provider: Arc<P>) -> Self {
        Self { provider }
    }

    pub fn into_server(self) -> ProviderServer<Self> {
        ProviderServer::new(self)
    }

    pub fn into_routes(self) -> Routes {
        Routes::new(self.into_server())
    }
}

#[tonic::async_trait]
impl<P: Provider> ProviderRpc for ProviderService<P> {
    async fn handshake(
        &self,
        request: Request<HandshakeRequest>,
    ) -> Result<Response<HandshakeReply>, Status> {
        self.provider
            .handshake(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn configure(
        &self,
        request: Request<ConfigureRequest>,
    ) -> Result<Response<RpcStatusReply>, Status> {
        self.provider
            .configure(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn deploy(
        &self,
        request: Request<DeployRequest>,
    ) -> Result<Response<DeployReply>, Status> {
        self.provider
            .deploy(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn destroy(
        &self,
        request: Request<DestroyRequest>,
    ) -> Result<Response<DestroyReply>, Status> {
        self.provider
            .destroy(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn get_console(
        &self,
        request: Request<GetConsoleRequest>,
    ) -> Result<Response<GetConsoleReply>, Status> {
        self.provider
            .get_console(request.into_inner())
            .await
            .map(Response::new)
    }
}
