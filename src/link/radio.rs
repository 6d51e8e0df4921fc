//! Radio link for physical drones
//!
//! The driver reports everything on its own thread. The callback handed to
//! it only posts a `RadioEvent` on an unbounded channel; a bridge task on the
//! runtime drains that channel and is the only code that touches the link
//! state or the fleet queues.

use super::{wait_connected, DroneLink, LinkSink, LinkState, RadioCallback, RadioDriver, RadioEvent};
use crate::error::LinkError;
use async_trait::async_trait;
use bytes::Bytes;
use fleet_shared::codec::{self, Transport, LOG_BLOCKS};
use fleet_shared::{timing, Command, DroneType};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// File in the cache directory describing the registered log blocks
pub const LOG_BLOCK_CACHE_FILE: &str = "log_blocks.json";

pub struct RadioLink {
    uri: String,
    driver: Arc<dyn RadioDriver>,
    sink: LinkSink,
    state_tx: watch::Sender<LinkState>,
    cancel: CancellationToken,
    bridge: Mutex<Option<JoinHandle<()>>>,
    cache_dir: Mutex<Option<TempDir>>,
    send_timeout: Duration,
}

impl RadioLink {
    pub fn new(uri: impl Into<String>, driver: Arc<dyn RadioDriver>, sink: LinkSink) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            uri: uri.into(),
            driver,
            sink,
            state_tx,
            cancel: CancellationToken::new(),
            bridge: Mutex::new(None),
            cache_dir: Mutex::new(None),
            send_timeout: Duration::from_millis(timing::RADIO_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Temporary directory owned by the current connection, if any
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .lock()
            .ok()
            .and_then(|dir| dir.as_ref().map(|d| d.path().to_path_buf()))
    }

    /// Run a driver call on the blocking pool
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, LinkError>
    where
        F: FnOnce(&dyn RadioDriver) -> Result<T, LinkError> + Send + 'static,
        T: Send + 'static,
    {
        let driver = self.driver.clone();
        tokio::task::spawn_blocking(move || f(driver.as_ref()))
            .await
            .map_err(|e| LinkError::Driver(e.to_string()))?
    }

    fn create_cache_dir(&self) -> Result<(), LinkError> {
        let dir = tempfile::Builder::new().prefix("fleet-radio-").tempdir()?;
        let layout = serde_json::to_vec_pretty(&LOG_BLOCKS[..]).map_err(std::io::Error::from)?;
        std::fs::write(dir.path().join(LOG_BLOCK_CACHE_FILE), layout)?;

        if let Ok(mut slot) = self.cache_dir.lock() {
            *slot = Some(dir);
        }
        Ok(())
    }

    fn release_cache_dir(&self) {
        let dir = self.cache_dir.lock().ok().and_then(|mut slot| slot.take());
        if let Some(dir) = dir {
            if let Err(e) = dir.close() {
                warn!(uri = %self.uri, error = %e, "Failed to remove radio cache directory");
            }
        }
    }

    async fn abort_connect(&self) {
        let _ = self
            .run_blocking(|driver| {
                driver.close_link();
                Ok(())
            })
            .await;
        set_state(&self.state_tx, LinkState::Disconnected);
    }
}

#[async_trait]
impl DroneLink for RadioLink {
    fn drone_type(&self) -> DroneType {
        DroneType::Crazyflie
    }

    fn address(&self) -> &str {
        &self.uri
    }

    async fn connect(&self, timeout: Duration) -> Result<(), LinkError> {
        if self.cancel.is_cancelled() {
            return Err(LinkError::Terminated);
        }
        if self.state() == LinkState::Connected {
            return Ok(());
        }
        self.state_tx.send_replace(LinkState::Connecting);

        if self.cache_dir().is_none() {
            self.create_cache_dir()?;
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(bridge_events(
            event_rx,
            self.sink.clone(),
            self.state_tx.clone(),
            self.uri.clone(),
            self.cancel.clone(),
        ));
        if let Ok(mut slot) = self.bridge.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }

        let callback: RadioCallback = Arc::new(move |event| {
            let _ = event_tx.send(event);
        });
        let uri = self.uri.clone();
        if let Err(e) = self.run_blocking(move |driver| driver.open_link(&uri, callback)).await {
            set_state(&self.state_tx, LinkState::Disconnected);
            return Err(e);
        }

        if let Err(e) = wait_connected(self.state_tx.subscribe(), timeout, &self.uri).await {
            warn!(uri = %self.uri, error = %e, "Radio link did not come up");
            self.abort_connect().await;
            return Err(e);
        }

        for block in LOG_BLOCKS.iter() {
            let registered = self
                .run_blocking(move |driver| {
                    driver.add_log_block(block)?;
                    driver.start_log_block(block.name)
                })
                .await;

            if let Err(e) = registered {
                error!(uri = %self.uri, block = block.name, error = %e, "Failed to start log block");
                self.abort_connect().await;
                return Err(e);
            }
        }

        info!(drone_id = self.sink.drone_id(), uri = %self.uri, "Radio link ready");
        Ok(())
    }

    async fn send_command(&self, command: Command, payload: Option<Bytes>) -> Result<(), LinkError> {
        wait_connected(self.state_tx.subscribe(), self.send_timeout, &self.uri)
            .await
            .map_err(|e| match e {
                LinkError::Timeout(_) => LinkError::NotConnected,
                other => other,
            })?;

        let frame = codec::encode_command(Transport::Radio, command, payload.as_deref());
        self.run_blocking(move |driver| driver.send_app_packet(&frame)).await?;

        debug!(drone_id = self.sink.drone_id(), %command, "Command sent on app channel");
        Ok(())
    }

    async fn terminate(&self) {
        if self.state_tx.send_replace(LinkState::Terminated) == LinkState::Terminated {
            return;
        }

        for block in LOG_BLOCKS.iter() {
            let name = block.name;
            if let Err(e) = self.run_blocking(move |driver| driver.stop_log_block(name)).await {
                debug!(uri = %self.uri, block = name, error = %e, "Log block not stopped");
            }
        }
        let _ = self
            .run_blocking(|driver| {
                driver.close_link();
                Ok(())
            })
            .await;

        self.cancel.cancel();
        let bridge = self.bridge.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = bridge {
            let _ = handle.await;
        }

        self.release_cache_dir();
        info!(drone_id = self.sink.drone_id(), uri = %self.uri, "Radio link terminated");
    }

    fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }
}

/// Move a link to `next` unless it was terminated
fn set_state(state_tx: &watch::Sender<LinkState>, next: LinkState) {
    state_tx.send_if_modified(|state| {
        if *state == LinkState::Terminated || *state == next {
            false
        } else {
            *state = next;
            true
        }
    });
}

/// Apply driver events on the runtime, in the order the driver fired them
async fn bridge_events(
    mut events: mpsc::UnboundedReceiver<RadioEvent>,
    sink: LinkSink,
    state_tx: watch::Sender<LinkState>,
    uri: String,
    cancel: CancellationToken,
) {
    let drone_id = sink.drone_id();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            RadioEvent::Connected => {
                info!(drone_id, %uri, "Radio connected");
                set_state(&state_tx, LinkState::Connected);
            }
            RadioEvent::Disconnected => {
                info!(drone_id, %uri, "Radio disconnected");
                set_state(&state_tx, LinkState::Disconnected);
            }
            RadioEvent::ConnectionFailed(reason) => {
                warn!(drone_id, %uri, %reason, "Radio connection failed");
                set_state(&state_tx, LinkState::Disconnected);
            }
            RadioEvent::ConnectionLost(reason) => {
                warn!(drone_id, %uri, %reason, "Radio connection lost");
                set_state(&state_tx, LinkState::Disconnected);
            }
            RadioEvent::LogData {
                block,
                timestamp,
                payload,
            } => match codec::decode_log_block(drone_id, &block, timestamp, &payload) {
                Ok(message) => sink.telemetry(message),
                Err(e) => error!(drone_id, %block, error = %e, "Dropping log block"),
            },
            RadioEvent::Console(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    sink.debug(line);
                }
            }
            RadioEvent::AppPacket(data) => {
                debug!(drone_id, len = data.len(), "App channel packet ignored");
            }
        }
    }
}
