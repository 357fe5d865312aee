// ABOUTME: Adapts process signals (Ctrl+C, SIGTERM) to a cancellation token.
// ABOUTME: Serve loops only ever see the token, never the signals themselves.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl+C or SIGTERM. Returns the name of the signal received.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|_| "Ctrl+C")
    }
}

/// Cancel `token` when a shutdown signal arrives.
///
/// The returned task also finishes if the token is cancelled some other way.
/// Failing to install the signal handlers cancels the token immediately.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_signal() => {
                match result {
                    Ok(name) => info!(signal = name, "Received signal, attempting graceful shutdown..."),
                    Err(e) => warn!(error = %e, "Failed to install signal handlers, shutting down"),
                }
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
