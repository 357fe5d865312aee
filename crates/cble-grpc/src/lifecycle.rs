// ABOUTME: Listener lifecycle: bind, optional TLS, serve, graceful drain on cancellation.
// ABOUTME: Created -> Bound -> Serving -> Draining -> Stopped, observable via a watch channel.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
#[cfg(unix)]
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::{Server, ServerTlsConfig};
use tracing::{debug, info, warn};

use crate::addr::ListenAddr;
use crate::error::GrpcError;
use crate::tls::ServerTlsOptions;

/// Where the listener is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Bound,
    Serving,
    Draining,
    Stopped,
}

/// Address a listener actually bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for BoundAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddr::Tcp(addr) => write!(f, "{}", addr),
            BoundAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, SocketFile),
}

/// The socket file a Unix listener created, identified by device and inode.
#[cfg(unix)]
struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
impl SocketFile {
    /// Remove the file only if it is still the one this listener created.
    fn remove_if_owned(&self) {
        use std::os::unix::fs::MetadataExt;

        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.dev() == self.dev && meta.ino() == self.ino => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
                }
            }
            Ok(_) => {
                warn!(path = %self.path.display(), "Socket file was replaced, leaving it in place");
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Socket file already gone");
            }
        }
    }
}

/// A server that has not bound its listener yet.
pub struct Lifecycle {
    listen: ListenAddr,
    tls: ServerTlsOptions,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    /// Create a lifecycle for the given address and TLS options.
    pub fn new(listen: ListenAddr, tls: ServerTlsOptions) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);
        Self {
            listen,
            tls,
            state: Arc::new(state),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe state transitions. The receiver outlives the bind/serve calls.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Load TLS material, then bind the listener.
    ///
    /// TLS configuration errors surface before any socket is opened. Bind
    /// failures are returned as-is and never retried.
    pub async fn bind(self) -> Result<BoundLifecycle, GrpcError> {
        let tls = self.tls.load()?;

        let listener = match &self.listen {
            ListenAddr::Tcp { host, port } => {
                let addr = format!("{}:{}", host, port);
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|source| GrpcError::Bind { addr, source })?;
                Listener::Tcp(listener)
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                let (listener, file) = bind_unix(path)?;
                Listener::Unix(listener, file)
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(path) => {
                return Err(GrpcError::Config(format!(
                    "local sockets are not supported on this platform: {}",
                    path.display()
                )))
            }
        };

        self.state.send_replace(LifecycleState::Bound);
        debug!(addr = %self.listen, "Listener bound");

        Ok(BoundLifecycle {
            listener,
            tls,
            state: self.state,
        })
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<(UnixListener, SocketFile), GrpcError> {
    use std::io;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let bind_err = |source: io::Error| GrpcError::Bind {
        addr: path.display().to_string(),
        source,
    };

    // Only a socket nobody is listening on may be replaced
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            match std::os::unix::net::UnixStream::connect(path) {
                Ok(_) => {
                    return Err(bind_err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        "another server is listening on this socket",
                    )))
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!(path = %path.display(), "Removing stale socket file");
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                Err(e) => return Err(bind_err(e)),
            }
        }
        Ok(_) => {
            return Err(bind_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a socket",
            )))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_err(e)),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(bind_err)?;
    }
    let listener = UnixListener::bind(path).map_err(bind_err)?;
    let meta = std::fs::symlink_metadata(path).map_err(bind_err)?;
    Ok((
        listener,
        SocketFile {
            path: path.to_path_buf(),
            dev: meta.dev(),
            ino: meta.ino(),
        },
    ))
}

/// A server with a bound listener, ready to serve.
pub struct BoundLifecycle {
    listener: Listener,
    tls: Option<ServerTlsConfig>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl BoundLifecycle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<BoundAddr, GrpcError> {
        match &self.listener {
            Listener::Tcp(listener) => listener
                .local_addr()
                .map(BoundAddr::Tcp)
                .map_err(|e| GrpcError::Serve(e.to_string())),
            #[cfg(unix)]
            Listener::Unix(_, file) => Ok(BoundAddr::Unix(file.path.clone())),
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve `routes` until `shutdown` is cancelled, then drain.
    ///
    /// Each inbound call runs on its own task. Once the token fires no new
    /// connections are accepted, calls already in flight run to completion,
    /// and only then does this return.
    pub async fn serve(self, routes: Routes, shutdown: CancellationToken) -> Result<(), GrpcError> {
        let addr = self.local_addr()?;
        let mut builder = Server::builder();
        let use_tls = self.tls.is_some();
        if let Some(tls) = self.tls {
            builder = builder
                .tls_config(tls)
                .map_err(|e| GrpcError::Config(format!("TLS config error: {}", e)))?;
        }
        let router = builder.add_routes(routes);

        let drain_state = Arc::clone(&self.state);
        let signal = async move {
            shutdown.cancelled().await;
            drain_state.send_replace(LifecycleState::Draining);
            warn!("Shutdown requested, draining in-flight calls...");
        };

        self.state.send_replace(LifecycleState::Serving);
        info!(addr = %addr, tls = use_tls, "Serving");

        let result = match self.listener {
            Listener::Tcp(listener) => {
                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                    .await
            }
            #[cfg(unix)]
            Listener::Unix(listener, file) => {
                let result = router
                    .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal)
                    .await;
                file.remove_if_owned();
                result
            }
        };

        self.state.send_replace(LifecycleState::Stopped);
        result.map_err(|e| GrpcError::Serve(e.to_string()))?;
        info!(addr = %addr, "Server shut down gracefully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_lifecycle_is_created() {
        let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", 0), ServerTlsOptions::disabled());
        assert_eq!(lifecycle.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn test_bind_reports_bound_address() {
        let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", 0), ServerTlsOptions::disabled());
        let bound = lifecycle.bind().await.unwrap();
        assert_eq!(bound.state(), LifecycleState::Bound);
        match bound.local_addr().unwrap() {
            BoundAddr::Tcp(addr) => assert_ne!(addr.port(), 0),
            other => panic!("unexpected bound address: {other}"),
        }
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", port), ServerTlsOptions::disabled());
        let rx = lifecycle.subscribe();
        let err = lifecycle.bind().await.err().unwrap();
        assert!(matches!(err, GrpcError::Bind { .. }));
        assert_eq!(*rx.borrow(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn test_tls_config_error_precedes_bind() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        // The port is taken, so reaching bind would produce a Bind error instead
        let tls = ServerTlsOptions {
            enabled: true,
            cert_file: None,
            key_file: None,
        };
        let lifecycle = Lifecycle::new(ListenAddr::tcp("127.0.0.1", port), tls);
        let err = lifecycle.bind().await.err().unwrap();
        assert!(matches!(err, GrpcError::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        // A listener that went away without cleaning up leaves its file behind
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let lifecycle = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled());
        let bound = lifecycle.bind().await.unwrap();
        assert_eq!(bound.local_addr().unwrap(), BoundAddr::Unix(path));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("broker.sock");

        let lifecycle = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled());
        lifecycle.bind().await.unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_on_live_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");

        let first = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled())
            .bind()
            .await
            .unwrap();

        let second = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled());
        let rx = second.subscribe();
        let err = second.bind().await.err().unwrap();
        assert!(matches!(err, GrpcError::Bind { .. }), "{err}");
        assert_eq!(*rx.borrow(), LifecycleState::Created);

        // The first listener still owns the path and still accepts
        assert!(path.exists());
        assert!(std::os::unix::net::UnixStream::connect(&path).is_ok());
        drop(first);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_over_regular_file_fails_and_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("important.txt");
        std::fs::write(&path, b"keep me").unwrap();

        let lifecycle = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled());
        let err = lifecycle.bind().await.err().unwrap();
        assert!(matches!(err, GrpcError::Bind { .. }), "{err}");
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_serve_leaves_replaced_socket_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");

        let bound = Lifecycle::new(ListenAddr::unix(&path), ServerTlsOptions::disabled())
            .bind()
            .await
            .unwrap();

        // Someone else takes over the path while we are bound
        std::fs::remove_file(&path).unwrap();
        let other = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        bound.serve(Routes::default(), token).await.unwrap();

        assert!(path.exists());
        assert!(std::os::unix::net::UnixStream::connect(&path).is_ok());
        drop(other);
    }
}
