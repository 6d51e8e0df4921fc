//! In-process link used by unit tests

use super::{DroneLink, LinkState};
use crate::error::LinkError;
use async_trait::async_trait;
use bytes::Bytes;
use fleet_shared::{Command, DroneType};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Records every command it is asked to send
pub struct MockLink {
    drone_type: DroneType,
    address: String,
    sent: Mutex<Vec<(Command, Option<Bytes>)>>,
    fail_sends: AtomicBool,
    terminations: AtomicUsize,
    state_tx: watch::Sender<LinkState>,
}

impl MockLink {
    pub fn new(drone_type: DroneType) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Connected);
        Arc::new(Self {
            drone_type,
            address: format!("mock://{drone_type}"),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            terminations: AtomicUsize::new(0),
            state_tx,
        })
    }

    pub fn failing(drone_type: DroneType) -> Arc<Self> {
        let link = Self::new(drone_type);
        link.fail_sends.store(true, Ordering::SeqCst);
        link
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    pub fn sent(&self) -> Vec<(Command, Option<Bytes>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DroneLink for MockLink {
    fn drone_type(&self) -> DroneType {
        self.drone_type
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, _timeout: Duration) -> Result<(), LinkError> {
        self.state_tx.send_replace(LinkState::Connected);
        Ok(())
    }

    async fn send_command(&self, command: Command, payload: Option<Bytes>) -> Result<(), LinkError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        self.sent.lock().unwrap().push((command, payload));
        Ok(())
    }

    async fn terminate(&self) {
        if self.state_tx.send_replace(LinkState::Terminated) != LinkState::Terminated {
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }
}
