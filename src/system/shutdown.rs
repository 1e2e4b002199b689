//! Ctrl-C and SIGTERM fan out to the run loop over a broadcast channel.
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// A single notification is all any listener needs.
const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

#[must_use]
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel::<()>(SHUTDOWN_CHANNEL_CAPACITY)
}

/// Forwards the first Ctrl-C or SIGTERM to `shutdown_tx`. The task also ends
/// when something else sends on the channel.
#[must_use]
pub fn spawn_signal_listener(shutdown_tx: &ShutdownSender) -> JoinHandle<()> {
    let shutdown_tx = shutdown_tx.clone();
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            name = next_signal() => {
                warn!("Received {}, aborting load generation", name);
                drop(shutdown_tx.send(()));
            }
        }
    })
}

#[cfg(unix)]
async fn next_signal() -> &'static str {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!("Failed to register SIGTERM handler: {}", err);
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "Ctrl-C",
        () = sigterm => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn next_signal() -> &'static str {
    drop(tokio::signal::ctrl_c().await);
    "Ctrl-C"
}
