//! Pulse subscribers
//!
//! A pulse is a snapshot of one drone pushed to every subscribed socket. The
//! socket abstraction stands in for the web socket owned by the router.

use crate::drone::Drone;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Subscriber disconnected")]
    Disconnected,

    #[error("No reply within {0:?}")]
    NoReply(Duration),

    #[error("Failed to encode pulse: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A bidirectional connection to one pulse subscriber
#[async_trait]
pub trait PulseSocket: Send + Sync {
    /// Peer description used in log lines
    fn peer(&self) -> String;

    async fn send(&self, pulse: &Drone) -> Result<(), PulseError>;

    /// Wait for the next message from the subscriber
    async fn receive(&self) -> Result<String, PulseError>;

    async fn close(&self);
}

/// Server side of an in-process socket pair
pub struct ChannelPulseSocket {
    peer: String,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Client side of an in-process socket pair
pub struct PulseClient {
    pulses: mpsc::UnboundedReceiver<String>,
    replies: mpsc::UnboundedSender<String>,
}

impl ChannelPulseSocket {
    pub fn pair(peer: impl Into<String>) -> (Self, PulseClient) {
        let (pulse_tx, pulse_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let socket = Self {
            peer: peer.into(),
            outbound: std::sync::Mutex::new(Some(pulse_tx)),
            inbound: Mutex::new(reply_rx),
        };
        let client = PulseClient {
            pulses: pulse_rx,
            replies: reply_tx,
        };
        (socket, client)
    }
}

#[async_trait]
impl PulseSocket for ChannelPulseSocket {
    fn peer(&self) -> String {
        self.peer.clone()
    }

    async fn send(&self, pulse: &Drone) -> Result<(), PulseError> {
        let text = serde_json::to_string(pulse)?;
        let outbound = self.outbound.lock().map_err(|_| PulseError::Disconnected)?;
        outbound
            .as_ref()
            .ok_or(PulseError::Disconnected)?
            .send(text)
            .map_err(|_| PulseError::Disconnected)
    }

    async fn receive(&self) -> Result<String, PulseError> {
        self.inbound.lock().await.recv().await.ok_or(PulseError::Disconnected)
    }

    async fn close(&self) {
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
    }
}

impl PulseClient {
    /// Next pulse, or `None` once the server closed the socket
    pub async fn next_pulse(&mut self) -> Option<Drone> {
        loop {
            let text = self.pulses.recv().await?;
            if let Ok(drone) = serde_json::from_str(&text) {
                return Some(drone);
            }
        }
    }

    /// Send a message to the server, which counts as a heartbeat
    pub fn reply(&self, text: &str) -> bool {
        self.replies.send(text.to_string()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drone::RegisteredDrone;
    use crate::link::mock::MockLink;
    use fleet_shared::DroneType;

    fn snapshot() -> Drone {
        RegisteredDrone::new(3, MockLink::new(DroneType::Crazyflie)).to_model()
    }

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (socket, mut client) = ChannelPulseSocket::pair("client-1");

        socket.send(&snapshot()).await.unwrap();
        let pulse = client.next_pulse().await.unwrap();
        assert_eq!(pulse.id, 3);
        assert_eq!(pulse.drone_type, DroneType::Crazyflie);

        assert!(client.reply("ack"));
        assert_eq!(socket.receive().await.unwrap(), "ack");
    }

    #[tokio::test]
    async fn test_close_ends_client_stream() {
        let (socket, mut client) = ChannelPulseSocket::pair("client-1");
        socket.close().await;

        assert!(client.next_pulse().await.is_none());
        assert!(matches!(socket.send(&snapshot()).await, Err(PulseError::Disconnected)));
    }

    #[tokio::test]
    async fn test_client_gone() {
        let (socket, client) = ChannelPulseSocket::pair("client-1");
        drop(client);

        assert!(matches!(socket.receive().await, Err(PulseError::Disconnected)));
        assert!(socket.send(&snapshot()).await.is_err());
    }
}
