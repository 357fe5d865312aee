// ABOUTME: Integration tests for the broker over a real gRPC connection.
// ABOUTME: Covers handshake, registration, duplicate rejection, and identity-checked unregister.

use std::time::Duration;

use cble_broker::{
    AllocationKind, BrokerClient, BrokerConfig, BrokerError, BrokerServer, Endpoint, ProviderKey,
};
use cble_grpc::{
    create_channel, BoundAddr, CancellationToken, ChannelConfig, GrpcError, PROTOCOL_VERSION,
};
use tokio::task::JoinHandle;

struct Running {
    addr: String,
    token: CancellationToken,
    handle: JoinHandle<Result<(), BrokerError>>,
    registry: std::sync::Arc<cble_broker::ProviderRegistry>,
}

impl Running {
    async fn client(&self) -> BrokerClient {
        BrokerClient::connect(&ChannelConfig::tcp(self.addr.clone()))
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.token.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("broker should stop")
            .unwrap()
            .unwrap();
    }
}

async fn start(config: BrokerConfig) -> Running {
    let server = BrokerServer::bind(&config).await.unwrap();
    let addr = match server.local_addr().unwrap() {
        BoundAddr::Tcp(addr) => addr.to_string(),
        other => panic!("unexpected bound address: {other}"),
    };
    let registry = server.registry();
    let token = CancellationToken::new();
    let handle = tokio::spawn(server.serve(token.clone()));
    Running {
        addr,
        token,
        handle,
        registry,
    }
}

fn tcp_config() -> BrokerConfig {
    BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        port_range_start: Some(45000),
        port_range_len: 500,
        seed: Some(11),
        ..Default::default()
    }
}

fn features() -> Vec<String> {
    vec!["DEPLOY".to_string(), "DESTROY".to_string()]
}

#[tokio::test]
async fn test_handshake_reports_server_version() {
    let broker = start(tcp_config()).await;
    let client = broker.client().await;
    assert_eq!(client.server_version(), PROTOCOL_VERSION);
    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_handshake_rejects_other_major() {
    let broker = start(tcp_config()).await;
    let channel = create_channel(&ChannelConfig::tcp(broker.addr.clone()))
        .await
        .unwrap();
    let err = BrokerClient::handshake_with(channel, "v99.0.0")
        .await
        .unwrap_err();
    match err {
        BrokerError::Grpc(GrpcError::HandshakeFailed(msg)) => {
            assert!(msg.contains("major version mismatch"), "{msg}")
        }
        other => panic!("unexpected error: {other}"),
    }
    broker.stop().await;
}

#[tokio::test]
async fn test_register_duplicate_and_unregister() {
    let broker = start(tcp_config()).await;
    let mut client = broker.client().await;

    let endpoint = client
        .register("aws", "v1.0.0", "secret", &features())
        .await
        .unwrap();
    match endpoint {
        Endpoint::Port(port) => assert!((45000..45500).contains(&port)),
        other => panic!("unexpected endpoint: {other}"),
    }

    let err = client
        .register("aws", "v1.0.0", "other", &features())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Duplicate(_)), "{err}");

    // Wrong identity leaves the registration in place
    assert!(!client.unregister("aws", "v1.0.0", "other").await.unwrap());
    assert!(!client.unregister("gcp", "v1.0.0", "secret").await.unwrap());
    assert!(broker
        .registry
        .get(&ProviderKey::new("aws", "v1.0.0"))
        .await
        .is_some());

    assert!(client.unregister("aws", "v1.0.0", "secret").await.unwrap());
    assert!(broker.registry.is_empty().await);

    // The key is free again
    client
        .register("aws", "v1.0.0", "fresh", &features())
        .await
        .unwrap();

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_get_distinct_ports() {
    let broker = start(tcp_config()).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let mut client = broker.client().await;
        tasks.push(tokio::spawn(async move {
            client
                .register(&format!("provider-{i}"), "v1.0.0", "id", &[])
                .await
                .unwrap()
        }));
    }

    let mut ports = std::collections::HashSet::new();
    for task in tasks {
        let Endpoint::Port(port) = task.await.unwrap() else {
            panic!("expected a port");
        };
        assert!(ports.insert(port), "port {port} assigned twice");
    }
    assert_eq!(broker.registry.len().await, 20);
    broker.stop().await;
}

#[tokio::test]
async fn test_saturated_range_reports_exhaustion() {
    let broker = start(BrokerConfig {
        port_range_len: 1,
        ..tcp_config()
    })
    .await;
    let mut client = broker.client().await;

    client.register("first", "v1", "a", &[]).await.unwrap();
    let err = client.register("second", "v1", "b", &[]).await.unwrap_err();
    assert!(matches!(err, BrokerError::AllocationExhausted(_)), "{err}");

    drop(client);
    broker.stop().await;
}

#[tokio::test]
async fn test_socket_allocation_hands_out_identifiers() {
    let broker = start(BrokerConfig {
        allocation: AllocationKind::Socket,
        ..tcp_config()
    })
    .await;
    let mut client = broker.client().await;

    let first = client.register("a", "v1", "x", &[]).await.unwrap();
    let second = client.register("b", "v1", "y", &[]).await.unwrap();
    match (first, second) {
        (Endpoint::Socket(a), Endpoint::Socket(b)) => assert_ne!(a, b),
        other => panic!("expected socket identifiers, got {other:?}"),
    }

    drop(client);
    broker.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_broker_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cble-server");
    let config = BrokerConfig {
        socket: Some(path.clone()),
        ..tcp_config()
    };

    let server = BrokerServer::bind(&config).await.unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(server.serve(token.clone()));

    let mut client = BrokerClient::connect(&ChannelConfig::unix(&path))
        .await
        .unwrap();
    let endpoint = client.register("local", "v1", "id", &[]).await.unwrap();
    assert!(matches!(endpoint, Endpoint::Port(_)));
    drop(client);

    token.cancel();
    handle.await.unwrap().unwrap();
    assert!(!path.exists());
}
