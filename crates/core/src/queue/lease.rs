//! Keeps a leased message invisible while its job runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::JobQueue;
use super::types::LeasedMessage;

/// Background task that renews a lease on a fixed interval.
///
/// Renewal failures are logged and retried on the next tick; the job keeps
/// running either way. Call [`LeaseKeeper::stop`] to end renewal and get back
/// the message with its latest pop receipt.
pub struct LeaseKeeper {
    message: Arc<Mutex<LeasedMessage>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LeaseKeeper {
    /// Start renewing `message` every `interval`, extending it by `visibility`.
    pub fn start(
        queue: Arc<dyn JobQueue>,
        message: LeasedMessage,
        interval: Duration,
        visibility: Duration,
    ) -> Self {
        let message = Arc::new(Mutex::new(message));
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let shared = Arc::clone(&message);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let mut current = shared.lock().await;
                        match queue.renew(&current, visibility).await {
                            Ok(renewed) => {
                                debug!(message_id = %renewed.message_id, "Renewed lease");
                                *current = renewed;
                            }
                            Err(e) => {
                                warn!(message_id = %current.message_id, error = %e, "Failed to renew lease");
                            }
                        }
                    }
                }
            }
        });

        Self {
            message,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stops renewal and returns the message as last renewed.
    ///
    /// Waits for an in-progress renewal so the returned pop receipt is current.
    pub async fn stop(mut self) -> LeasedMessage {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.message.lock().await.clone()
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
