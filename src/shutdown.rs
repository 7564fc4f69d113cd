use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel a fresh token on the first SIGTERM or SIGINT.
///
/// Cancellation closes the HTTP listener and the status hub. Jobs already
/// queued keep running; [`Node::run`](crate::node::Node::run) waits for
/// them before returning.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "Stopping intake, draining update queue");
        trigger.cancel();
    });

    Ok(token)
}
