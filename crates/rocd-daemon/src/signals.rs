//! Signal handling for graceful shutdown.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Set up SIGTERM/SIGINT handlers.
///
/// Returns a token that is cancelled when a shutdown signal arrives;
/// every long-lived task in the daemon is tied to it.
pub fn shutdown_token() -> Result<CancellationToken> {
    let token = CancellationToken::new();

    let term_token = token.clone();
    tokio::spawn(async move {
        if let Ok(mut stream) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            stream.recv().await;
            info!("received SIGTERM");
            term_token.cancel();
        }
    });

    let int_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT");
            int_token.cancel();
        }
    });

    Ok(token)
}
