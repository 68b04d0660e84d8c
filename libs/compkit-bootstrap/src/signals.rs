use anyhow::Result;
use tokio::signal;

/// Which termination signal ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    Terminate,
}

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    handler.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

/// Wait for termination signals (Ctrl+C, SIGTERM).
///
/// A handler that fails to install is reported as an error so callers can
/// fall back to a plain `ctrl_c()` wait.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let received = tokio::select! {
        result = signal::ctrl_c() => {
            result.map(|_| ShutdownSignal::CtrlC).inspect_err(|e| {
                tracing::error!(%e, "Failed to install Ctrl+C handler");
            })?
        },
        result = terminate() => {
            result.map(|_| ShutdownSignal::Terminate).inspect_err(|e| {
                tracing::error!(%e, "Failed to install SIGTERM handler");
            })?
        },
    };

    tracing::info!(signal = ?received, "Shutdown signal received, initiating graceful shutdown");
    Ok(received)
}
