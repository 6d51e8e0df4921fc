//! Pulse socket heartbeat
//!
//! One watcher per subscribed socket. It is the only reader of the socket:
//! every message received counts as a heartbeat and as a reply to the last
//! pulse. A socket silent for longer than the timeout is closed; a silent or
//! disconnected socket is unsubscribed.

use super::BackgroundTask;
use crate::registry::{FleetRegistry, PulseSubscriber};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const WORKER: &str = "heartbeat";

pub fn spawn(
    registry: Arc<FleetRegistry>,
    subscriber: PulseSubscriber,
    timeout: Duration,
) -> BackgroundTask {
    BackgroundTask::spawn(WORKER, move |cancel| {
        watch_heartbeat(registry, subscriber, timeout, cancel)
    })
}

pub async fn watch_heartbeat(
    registry: Arc<FleetRegistry>,
    subscriber: PulseSubscriber,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let peer = subscriber.socket.peer();

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = tokio::time::timeout(timeout, subscriber.socket.receive()) => received,
        };

        match received {
            Ok(Ok(message)) => {
                debug!(socket_id = subscriber.id, "Heartbeat: {}", message);
                subscriber.record_reply();
            }
            Ok(Err(e)) => {
                warn!(socket_id = subscriber.id, %peer, "Pulse socket disconnected: {}", e);
                break;
            }
            Err(_) => {
                warn!(socket_id = subscriber.id, %peer, "Pulse socket timed out");
                subscriber.socket.close().await;
                break;
            }
        }
    }

    registry.unregister_socket(subscriber.id).await;
}
