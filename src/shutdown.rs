//! Shutdown Handling
//!
//! Waits for an operator interrupt. The process exits as soon as a signal
//! arrives; in-flight sessions are disposable and the remote server keeps
//! running without the bridge.

use tracing::info;

use crate::Result;

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere)
pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
