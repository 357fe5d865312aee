// ABOUTME: Integration tests for the listener lifecycle.
// ABOUTME: Runs a real gRPC server and checks state transitions and graceful drain.

use std::time::Duration;

use cble_grpc::{
    create_channel, BoundAddr, ChannelConfig, CancellationToken, Lifecycle, LifecycleState,
    ListenAddr, ServerTlsOptions,
};
use cble_proto::client::CbleClient;
use cble_proto::server::{Cble, CbleServer};
use cble_proto::{
    HandshakeReply, HandshakeRequest, RegistrationReply, RegistrationRequest,
    UnregistrationReply, UnregistrationRequest,
};
use tokio::sync::mpsc;
use tonic::service::Routes;
use tonic::{Request, Response, Status};

/// Broker stub whose handshake takes a while, reporting when it starts.
struct SlowBroker {
    entered: mpsc::UnboundedSender<()>,
    delay: Duration,
}

#[tonic::async_trait]
impl Cble for SlowBroker {
    async fn handshake(
        &self,
        request: Request<HandshakeRequest>,
    ) -> Result<Response<HandshakeReply>, Status> {
        let _ = self.entered.send(());
        tokio::time::sleep(self.delay).await;
        Ok(Response::new(HandshakeReply {
            server_version: request.into_inner().client_version,
        }))
    }

    async fn register_provider(
        &self,
        _request: Request<RegistrationRequest>,
    ) -> Result<Response<RegistrationReply>, Status> {
        Err(Status::unimplemented("register_provider"))
    }

    async fn unregister_provider(
        &self,
        _request: Request<UnregistrationRequest>,
    ) -> Result<Response<UnregistrationReply>, Status> {
        Err(Status::unimplemented("unregister_provider"))
    }
}

fn routes(delay: Duration) -> (Routes, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let broker = SlowBroker { entered: tx, delay };
    (Routes::new(CbleServer::new(broker)), rx)
}

#[tokio::test]
async fn test_in_flight_call_completes_after_cancellation() {
    let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", 0), ServerTlsOptions::disabled());
    let mut states = lifecycle.subscribe();
    let bound = lifecycle.bind().await.unwrap();
    let addr = match bound.local_addr().unwrap() {
        BoundAddr::Tcp(addr) => addr,
        other => panic!("unexpected bound address: {other}"),
    };

    let token = CancellationToken::new();
    let (routes, mut entered) = routes(Duration::from_millis(300));
    let server = tokio::spawn(bound.serve(routes, token.clone()));

    let channel = create_channel(&ChannelConfig::tcp(addr.to_string()))
        .await
        .unwrap();
    let mut client = CbleClient::new(channel);
    let call = tokio::spawn(async move {
        client
            .handshake(HandshakeRequest {
                client_version: "v1.0.0".to_string(),
            })
            .await
    });

    // Cancel only once the call has been admitted
    entered.recv().await.unwrap();
    token.cancel();

    let reply = call.await.unwrap().unwrap().into_inner();
    assert_eq!(reply.server_version, "v1.0.0");

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("serve should return after draining")
        .unwrap()
        .unwrap();

    states.changed().await.ok();
    assert_eq!(*states.borrow(), LifecycleState::Stopped);

    // The listener is released: new connections are refused
    let config =
        ChannelConfig::tcp(addr.to_string()).with_connect_timeout(Duration::from_secs(2));
    assert!(create_channel(&config).await.is_err());
}

#[tokio::test]
async fn test_new_calls_refused_while_draining() {
    let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", 0), ServerTlsOptions::disabled());
    let mut states = lifecycle.subscribe();
    let bound = lifecycle.bind().await.unwrap();
    let addr = match bound.local_addr().unwrap() {
        BoundAddr::Tcp(addr) => addr,
        other => panic!("unexpected bound address: {other}"),
    };

    let token = CancellationToken::new();
    let (routes, mut entered) = routes(Duration::from_millis(1500));
    let server = tokio::spawn(bound.serve(routes, token.clone()));

    let channel = create_channel(&ChannelConfig::tcp(addr.to_string()))
        .await
        .unwrap();
    let mut client = CbleClient::new(channel);
    let call = tokio::spawn(async move {
        client
            .handshake(HandshakeRequest {
                client_version: "v1.0.0".to_string(),
            })
            .await
    });

    entered.recv().await.unwrap();
    token.cancel();
    states
        .wait_for(|s| *s == LifecycleState::Draining)
        .await
        .unwrap();

    // A fresh connection made during the drain never reaches the service
    let late = async {
        let config = ChannelConfig::tcp(addr.to_string())
            .with_connect_timeout(Duration::from_millis(400));
        let channel = create_channel(&config).await?;
        let reply = CbleClient::new(channel)
            .handshake(HandshakeRequest {
                client_version: "v2.0.0".to_string(),
            })
            .await;
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(reply.is_ok())
    };
    let served = tokio::time::timeout(Duration::from_millis(500), late)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or(false);
    assert!(!served, "a call started during the drain was served");
    assert!(entered.try_recv().is_err());
    assert_eq!(*states.borrow(), LifecycleState::Draining);

    // The call admitted before cancellation still completes
    let reply = call.await.unwrap().unwrap().into_inner();
    assert_eq!(reply.server_version, "v1.0.0");

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("serve should return after draining")
        .unwrap()
        .unwrap();
    assert_eq!(*states.borrow(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_state_transitions_through_serving() {
    let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", 0), ServerTlsOptions::disabled());
    let mut states = lifecycle.subscribe();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Created);

    let bound = lifecycle.bind().await.unwrap();
    assert_eq!(*states.borrow_and_update(), LifecycleState::Bound);

    let token = CancellationToken::new();
    let (routes, _entered) = routes(Duration::ZERO);
    let server = tokio::spawn(bound.serve(routes, token.clone()));

    states
        .wait_for(|s| *s == LifecycleState::Serving)
        .await
        .unwrap();

    token.cancel();
    server.await.unwrap().unwrap();
    assert_eq!(*states.borrow(), LifecycleState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_serve_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broker.sock");

    let lifecycle = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled());
    let bound = lifecycle.bind().await.unwrap();
    assert!(path.exists());

    let token = CancellationToken::new();
    let (routes, _entered) = routes(Duration::ZERO);
    let server = tokio::spawn(bound.serve(routes, token.clone()));

    let channel = create_channel(&ChannelConfig::unix(&path)).await.unwrap();
    let mut client = CbleClient::new(channel);
    let reply = client
        .handshake(HandshakeRequest {
            client_version: "v0.1.0".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.server_version, "v0.1.0");
    drop(client);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("serve should return after draining")
        .unwrap()
        .unwrap();
    assert!(!path.exists());
}
