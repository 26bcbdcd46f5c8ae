pub mod backoff;

pub use backoff::Backoff;

use tokio::sync::watch;

/// Resolve once shutdown is requested, or once the shutdown sender is gone.
pub async fn shutdown_signal(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

pub fn is_shutdown(shutdown_rx: &watch::Receiver<bool>) -> bool {
    *shutdown_rx.borrow()
}
