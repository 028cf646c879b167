use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Wire SIGTERM and SIGINT to a cancellation token.
///
/// Cancelling the token stops the dispatch loop at its next suspension
/// point: no new jobs are pulled from the pending set, but jobs already
/// handed to the backend keep running and report completions on their own.
/// Callers that need a fully drained shutdown should wait on the loop's
/// join handle after the token fires.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = received, "Shutdown signal received; stopping dispatch");
        trigger.cancel();
    });

    token
}
