//! Drone links
//!
//! A link owns the transport to one drone. It delivers decoded telemetry and
//! console text into the fleet queues through its `LinkSink` and exposes its
//! connection state as a `watch` channel. Links never reconnect on their own;
//! a lost link only reports `Disconnected`.

pub mod driver;
pub mod radio;
pub mod stream;
pub mod udp_driver;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::LinkError;
use async_trait::async_trait;
use bytes::Bytes;
use fleet_shared::{now_ms, Command, DroneId, DroneType, TelemetryMessage};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub use driver::{RadioCallback, RadioDriver, RadioEvent};
pub use radio::RadioLink;
pub use stream::StreamLink;
pub use udp_driver::UdpRadioDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    /// Resources released, the link cannot be used anymore
    Terminated,
}

/// A line of free text printed by a drone's console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLine {
    pub drone_id: DroneId,
    /// Receipt time, milliseconds since Unix epoch
    pub timestamp: u64,
    pub message: String,
}

/// Where a link delivers what it receives
#[derive(Debug, Clone)]
pub struct LinkSink {
    drone_id: DroneId,
    telemetry: mpsc::UnboundedSender<TelemetryMessage>,
    debug: mpsc::UnboundedSender<DebugLine>,
}

impl LinkSink {
    pub fn new(
        drone_id: DroneId,
        telemetry: mpsc::UnboundedSender<TelemetryMessage>,
        debug: mpsc::UnboundedSender<DebugLine>,
    ) -> Self {
        Self {
            drone_id,
            telemetry,
            debug,
        }
    }

    pub fn drone_id(&self) -> DroneId {
        self.drone_id
    }

    /// Queue a decoded telemetry message; dropped if the fleet is shutting down
    pub fn telemetry(&self, message: TelemetryMessage) {
        let _ = self.telemetry.send(message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        let _ = self.debug.send(DebugLine {
            drone_id: self.drone_id,
            timestamp: now_ms(),
            message: message.into(),
        });
    }
}

/// Connection to a single drone
#[async_trait]
pub trait DroneLink: Send + Sync {
    /// Kind of drone served by this transport
    fn drone_type(&self) -> DroneType;

    /// URI or socket address of the drone
    fn address(&self) -> &str;

    /// Open the transport, waiting at most `timeout` for it to come up
    async fn connect(&self, timeout: Duration) -> Result<(), LinkError>;

    /// Send a command once the link is connected
    async fn send_command(&self, command: Command, payload: Option<Bytes>) -> Result<(), LinkError>;

    /// Release the transport. Calling it again is a no-op.
    async fn terminate(&self);

    fn subscribe_state(&self) -> watch::Receiver<LinkState>;

    fn state(&self) -> LinkState {
        *self.subscribe_state().borrow()
    }
}

/// Wait until the observed link reports `Connected`
///
/// Returns `Timeout` carrying `address` when the deadline passes first, and
/// `Terminated` if the link is shut down while waiting.
pub(crate) async fn wait_connected(
    mut state: watch::Receiver<LinkState>,
    timeout: Duration,
    address: &str,
) -> Result<(), LinkError> {
    let wait = state.wait_for(|s| matches!(s, LinkState::Connected | LinkState::Terminated));

    let connected = match tokio::time::timeout(timeout, wait).await {
        Ok(Ok(s)) => *s == LinkState::Connected,
        Ok(Err(_)) => false,
        Err(_) => return Err(LinkError::Timeout(address.to_string())),
    };

    if connected {
        Ok(())
    } else {
        Err(LinkError::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_connected() {
        let (tx, rx) = watch::channel(LinkState::Connecting);
        let waiter = tokio::spawn(wait_connected(rx, Duration::from_secs(1), "test"));

        tx.send_replace(LinkState::Connected);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_connected_times_out() {
        let (_tx, rx) = watch::channel(LinkState::Connecting);
        let result = wait_connected(rx, Duration::from_millis(20), "radio://0/80").await;
        assert!(matches!(result, Err(LinkError::Timeout(uri)) if uri == "radio://0/80"));
    }

    #[tokio::test]
    async fn test_wait_connected_on_terminated_link() {
        let (_tx, rx) = watch::channel(LinkState::Terminated);
        let result = wait_connected(rx, Duration::from_secs(1), "test").await;
        assert!(matches!(result, Err(LinkError::Terminated)));
    }

    #[test]
    fn test_sink_attributes_debug_lines() {
        let (telemetry_tx, _telemetry_rx) = mpsc::unbounded_channel();
        let (debug_tx, mut debug_rx) = mpsc::unbounded_channel();
        let sink = LinkSink::new(4, telemetry_tx, debug_tx);

        sink.debug("battery low");
        let line = debug_rx.try_recv().unwrap();
        assert_eq!(line.drone_id, 4);
        assert_eq!(line.message, "battery low");
    }
}
