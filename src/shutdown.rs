use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
/// All subsystems should monitor this token and drain gracefully.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let signals = signal(SignalKind::terminate())
            .and_then(|sigterm| Ok((sigterm, signal(SignalKind::interrupt())?)));

        match signals {
            Ok((mut sigterm, mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutdown only by exit");
                    std::future::pending::<()>().await;
                }
                tracing::info!("Received Ctrl-C, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    token
}
