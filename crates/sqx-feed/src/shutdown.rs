use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `root` on SIGTERM or ctrl-c
pub async fn cancel_on_signal(root: CancellationToken) {
    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            root.cancel();
        }
        _ = root.cancelled() => {}
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "failed to listen for SIGTERM, ctrl-c only");
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
