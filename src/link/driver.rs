//! Radio driver seam
//!
//! Radio libraries are synchronous and report progress through callbacks
//! fired on a thread they own. `RadioDriver` captures that contract so the
//! radio link can bridge it into the async runtime.

use crate::error::LinkError;
use fleet_shared::codec::LogBlockConfig;
use std::sync::Arc;

/// Something that happened on the radio, as reported by the driver thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Connected,
    Disconnected,
    ConnectionFailed(String),
    ConnectionLost(String),
    /// One sample of a periodic log block
    LogData {
        block: String,
        timestamp: u64,
        payload: Vec<u8>,
    },
    /// Text printed on the drone console
    Console(String),
    /// Packet received on the application channel
    AppPacket(Vec<u8>),
}

/// Invoked by the driver from its own thread; must not block
pub type RadioCallback = Arc<dyn Fn(RadioEvent) + Send + Sync>;

/// A callback-driven radio library serving one drone
///
/// Every method may block on I/O, so callers run them off the async runtime.
pub trait RadioDriver: Send + Sync + 'static {
    /// Start opening the link. Returns once the attempt is under way; the
    /// outcome is reported through `callback`.
    fn open_link(&self, uri: &str, callback: RadioCallback) -> Result<(), LinkError>;

    /// Register a periodic log block on the drone
    fn add_log_block(&self, block: &'static LogBlockConfig) -> Result<(), LinkError>;

    fn start_log_block(&self, name: &str) -> Result<(), LinkError>;

    fn stop_log_block(&self, name: &str) -> Result<(), LinkError>;

    /// Send raw bytes on the application channel
    fn send_app_packet(&self, data: &[u8]) -> Result<(), LinkError>;

    fn close_link(&self);
}
