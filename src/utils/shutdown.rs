//! Termination signal handling.

use tokio::signal;
use tracing::info;

/// Resolve when the process receives Ctrl+C or, on unix, SIGTERM.
///
/// Raced against the backup run in `main`; winning the race drops the run
/// future, which releases the temporary archive.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, aborting backup run");
        }
        _ = terminate => {
            info!("received SIGTERM, aborting backup run");
        }
    }
}
