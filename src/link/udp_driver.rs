//! UDP radio driver
//!
//! Speaks CRTP-style datagrams to a radio bridge or simulator:
//!
//! ```text
//! [ header: port << 4 | channel ][ body ]
//!
//! port 0   console text
//! port 5   logging   channel 1: control  [op][block id][...]
//!                    channel 2: data     [block id][timestamp u24 LE][values]
//! port 13  application channel
//! 0xFF     link ping
//! ```
//!
//! A background OS thread owns the receive side and reports through the
//! callback, like the vendor radio library does.

use super::{RadioCallback, RadioDriver, RadioEvent};
use crate::error::LinkError;
use fleet_shared::codec::LogBlockConfig;
use fleet_shared::timing;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

pub const PING: u8 = 0xFF;
pub const CONSOLE_PORT: u8 = 0;
pub const LOG_PORT: u8 = 5;
pub const APP_PORT: u8 = 13;

pub const LOG_CONTROL_CHANNEL: u8 = 1;
pub const LOG_DATA_CHANNEL: u8 = 2;

pub const LOG_CREATE: u8 = 0;
pub const LOG_DELETE: u8 = 2;
pub const LOG_START: u8 = 3;
pub const LOG_STOP: u8 = 4;

/// Receive poll interval; an idle poll sends a ping
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn header(port: u8, channel: u8) -> u8 {
    (port << 4) | (channel & 0x03)
}

struct Shared {
    socket: UdpSocket,
    running: AtomicBool,
    /// Registered blocks, indexed by block id
    blocks: Mutex<Vec<&'static LogBlockConfig>>,
}

impl Shared {
    fn send(&self, packet: &[u8]) -> Result<(), LinkError> {
        self.socket.send(packet)?;
        Ok(())
    }

    fn block_id(&self, name: &str) -> Result<u8, LinkError> {
        let blocks = self
            .blocks
            .lock()
            .map_err(|_| LinkError::Driver("block table poisoned".into()))?;
        blocks
            .iter()
            .position(|b| b.name == name)
            .map(|id| id as u8)
            .ok_or_else(|| LinkError::Driver(format!("log block {name} was never added")))
    }

    fn block_name(&self, id: u8) -> String {
        self.blocks
            .lock()
            .ok()
            .and_then(|blocks| blocks.get(id as usize).map(|b| b.name.to_string()))
            .unwrap_or_else(|| format!("block-{id}"))
    }

    fn parse_packet(&self, packet: &[u8]) -> Option<RadioEvent> {
        let (&head, body) = packet.split_first()?;
        if head == PING {
            return None;
        }

        match (head >> 4, head & 0x03) {
            (CONSOLE_PORT, _) => Some(RadioEvent::Console(String::from_utf8_lossy(body).into_owned())),
            (LOG_PORT, LOG_DATA_CHANNEL) if body.len() >= 4 => Some(RadioEvent::LogData {
                block: self.block_name(body[0]),
                timestamp: u32::from_le_bytes([body[1], body[2], body[3], 0]) as u64,
                payload: body[4..].to_vec(),
            }),
            (APP_PORT, _) => Some(RadioEvent::AppPacket(body.to_vec())),
            _ => None,
        }
    }
}

pub struct UdpRadioDriver {
    link_lost_timeout: Duration,
    shared: Mutex<Option<Arc<Shared>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdpRadioDriver {
    pub fn new() -> Self {
        Self {
            link_lost_timeout: Duration::from_millis(timing::RADIO_LINK_LOST_TIMEOUT_MS),
            shared: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub fn with_link_lost_timeout(mut self, timeout: Duration) -> Self {
        self.link_lost_timeout = timeout;
        self
    }

    fn shared(&self) -> Result<Arc<Shared>, LinkError> {
        self.shared
            .lock()
            .ok()
            .and_then(|shared| shared.clone())
            .ok_or(LinkError::NotConnected)
    }
}

impl Default for UdpRadioDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDriver for UdpRadioDriver {
    fn open_link(&self, uri: &str, callback: RadioCallback) -> Result<(), LinkError> {
        let address = uri
            .strip_prefix("udp://")
            .ok_or_else(|| LinkError::Driver(format!("unsupported radio uri {uri}")))?;

        // A previous session still owns a socket and a receive thread
        self.close_link();

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(address).map_err(|_| LinkError::Connect(uri.to_string()))?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let shared = Arc::new(Shared {
            socket,
            running: AtomicBool::new(true),
            blocks: Mutex::new(Vec::new()),
        });
        shared.send(&[PING])?;

        let worker = shared.clone();
        let link_lost_timeout = self.link_lost_timeout;
        let handle = std::thread::Builder::new()
            .name(format!("radio-{address}"))
            .spawn(move || receive_loop(worker, callback, link_lost_timeout))?;

        if let Ok(mut slot) = self.shared.lock() {
            *slot = Some(shared);
        }
        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    fn add_log_block(&self, block: &'static LogBlockConfig) -> Result<(), LinkError> {
        let shared = self.shared()?;
        let id = {
            let mut blocks = shared
                .blocks
                .lock()
                .map_err(|_| LinkError::Driver("block table poisoned".into()))?;
            blocks.push(block);
            (blocks.len() - 1) as u8
        };

        let mut packet = vec![
            header(LOG_PORT, LOG_CONTROL_CHANNEL),
            LOG_CREATE,
            id,
            block.variables.len() as u8,
        ];
        for variable in block.variables {
            packet.push(variable.fetch_as.wire_id());
            packet.push(variable.name.len() as u8);
            packet.extend_from_slice(variable.name.as_bytes());
        }
        shared.send(&packet)
    }

    fn start_log_block(&self, name: &str) -> Result<(), LinkError> {
        let shared = self.shared()?;
        let id = shared.block_id(name)?;
        let period = shared
            .blocks
            .lock()
            .ok()
            .and_then(|blocks| blocks.get(id as usize).map(|b| b.period_ms))
            .unwrap_or(timing::LOG_BLOCK_PERIOD_MS);

        // Period travels in units of 10 ms
        let period = (period / 10).clamp(1, u8::MAX as u64) as u8;
        shared.send(&[header(LOG_PORT, LOG_CONTROL_CHANNEL), LOG_START, id, period])
    }

    fn stop_log_block(&self, name: &str) -> Result<(), LinkError> {
        let shared = self.shared()?;
        let id = shared.block_id(name)?;
        shared.send(&[header(LOG_PORT, LOG_CONTROL_CHANNEL), LOG_STOP, id])
    }

    fn send_app_packet(&self, data: &[u8]) -> Result<(), LinkError> {
        let shared = self.shared()?;
        let mut packet = Vec::with_capacity(data.len() + 1);
        packet.push(header(APP_PORT, 0));
        packet.extend_from_slice(data);
        shared.send(&packet)
    }

    fn close_link(&self) {
        let shared = self.shared.lock().ok().and_then(|mut slot| slot.take());
        if let Some(shared) = shared {
            let count = shared.blocks.lock().map(|blocks| blocks.len()).unwrap_or(0);
            for id in 0..count {
                let _ = shared.send(&[header(LOG_PORT, LOG_CONTROL_CHANNEL), LOG_DELETE, id as u8]);
            }
            shared.running.store(false, Ordering::SeqCst);
        }

        let thread = self.thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

fn receive_loop(shared: Arc<Shared>, callback: RadioCallback, link_lost_timeout: Duration) {
    let mut buf = [0u8; 256];
    let mut connected = false;
    let mut last_rx = Instant::now();

    while shared.running.load(Ordering::SeqCst) {
        match shared.socket.recv(&mut buf) {
            Ok(n) => {
                last_rx = Instant::now();
                if !connected {
                    connected = true;
                    callback(RadioEvent::Connected);
                }
                if let Some(event) = shared.parse_packet(&buf[..n]) {
                    callback(event);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ConnectionRefused
                ) =>
            {
                if connected && last_rx.elapsed() > link_lost_timeout {
                    connected = false;
                    callback(RadioEvent::ConnectionLost(format!(
                        "no packet for {} ms",
                        link_lost_timeout.as_millis()
                    )));
                }
                if let Err(e) = shared.socket.send(&[PING]) {
                    debug!(error = %e, "Radio ping not sent");
                }
            }
            Err(e) => {
                callback(RadioEvent::ConnectionFailed(e.to_string()));
                break;
            }
        }
    }

    callback(RadioEvent::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_shared::codec::LOG_BLOCKS;
    use std::net::SocketAddr;
    use std::sync::mpsc;

    struct FakeDrone {
        socket: UdpSocket,
        peer: Option<SocketAddr>,
    }

    impl FakeDrone {
        fn bind() -> Self {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            Self { socket, peer: None }
        }

        fn uri(&self) -> String {
            format!("udp://{}", self.socket.local_addr().unwrap())
        }

        /// Next datagram that is not a ping
        fn recv(&mut self) -> Vec<u8> {
            let mut buf = [0u8; 256];
            loop {
                let (n, peer) = self.socket.recv_from(&mut buf).unwrap();
                self.peer = Some(peer);
                if buf[..n] != [PING] {
                    return buf[..n].to_vec();
                }
            }
        }

        fn accept(&mut self) {
            let mut buf = [0u8; 256];
            let (_, peer) = self.socket.recv_from(&mut buf).unwrap();
            self.peer = Some(peer);
            self.send(&[PING]);
        }

        fn send(&self, packet: &[u8]) {
            self.socket.send_to(packet, self.peer.unwrap()).unwrap();
        }
    }

    fn callback() -> (RadioCallback, mpsc::Receiver<RadioEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: RadioCallback = Arc::new(move |event| {
            let _ = tx.lock().unwrap().send(event);
        });
        (callback, rx)
    }

    fn next(rx: &mpsc::Receiver<RadioEvent>) -> RadioEvent {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_header() {
        assert_eq!(header(LOG_PORT, LOG_DATA_CHANNEL), 0x52);
        assert_eq!(header(APP_PORT, 0), 0xD0);
    }

    #[test]
    fn test_unsupported_uri() {
        let driver = UdpRadioDriver::new();
        let (callback, _rx) = callback();
        assert!(matches!(
            driver.open_link("radio://0/80/2M", callback),
            Err(LinkError::Driver(_))
        ));
    }

    #[test]
    fn test_calls_before_open() {
        let driver = UdpRadioDriver::new();
        assert!(matches!(driver.send_app_packet(&[1]), Err(LinkError::NotConnected)));
        driver.close_link();
    }

    #[test]
    fn test_session_with_fake_drone() {
        let mut drone = FakeDrone::bind();
        let driver = UdpRadioDriver::new();
        let (callback, events) = callback();

        driver.open_link(&drone.uri(), callback).unwrap();
        drone.accept();
        assert_eq!(next(&events), RadioEvent::Connected);

        driver.add_log_block(&LOG_BLOCKS[0]).unwrap();
        let create = drone.recv();
        assert_eq!(&create[..4], &[0x51, LOG_CREATE, 0, 6]);

        driver.start_log_block("battery_and_position").unwrap();
        assert_eq!(drone.recv(), vec![0x51, LOG_START, 0, 80]);
        assert!(driver.start_log_block("range").is_err());

        let mut data = vec![header(LOG_PORT, LOG_DATA_CHANNEL), 0, 0x10, 0x27, 0x00];
        data.extend_from_slice(&[7u8; 18]);
        drone.send(&data);
        assert_eq!(
            next(&events),
            RadioEvent::LogData {
                block: "battery_and_position".into(),
                timestamp: 10_000,
                payload: vec![7u8; 18],
            }
        );

        drone.send(&[header(LOG_PORT, LOG_DATA_CHANNEL), 5, 0, 0, 0, 1, 2]);
        assert!(matches!(next(&events), RadioEvent::LogData { block, .. } if block == "block-5"));

        drone.send(b"\x00hello");
        assert_eq!(next(&events), RadioEvent::Console("hello".into()));

        driver.send_app_packet(&[1, 0, 0, 0]).unwrap();
        assert_eq!(drone.recv(), vec![0xD0, 1, 0, 0, 0]);

        driver.stop_log_block("battery_and_position").unwrap();
        assert_eq!(drone.recv(), vec![0x51, LOG_STOP, 0]);

        driver.close_link();
        assert_eq!(next(&events), RadioEvent::Disconnected);
    }

    #[test]
    fn test_silence_reports_connection_lost() {
        let mut drone = FakeDrone::bind();
        let driver = UdpRadioDriver::new().with_link_lost_timeout(Duration::from_millis(100));
        let (callback, events) = callback();

        driver.open_link(&drone.uri(), callback).unwrap();
        drone.accept();
        assert_eq!(next(&events), RadioEvent::Connected);
        assert!(matches!(next(&events), RadioEvent::ConnectionLost(_)));

        driver.close_link();
    }

    #[test]
    fn test_reopen_stops_previous_session() {
        let mut first_drone = FakeDrone::bind();
        let mut second_drone = FakeDrone::bind();
        let driver = UdpRadioDriver::new();

        let (first, first_events) = callback();
        driver.open_link(&first_drone.uri(), first).unwrap();
        first_drone.accept();
        assert_eq!(next(&first_events), RadioEvent::Connected);

        let (second, second_events) = callback();
        driver.open_link(&second_drone.uri(), second).unwrap();
        assert_eq!(next(&first_events), RadioEvent::Disconnected);

        second_drone.accept();
        assert_eq!(next(&second_events), RadioEvent::Connected);
        assert!(first_events.recv_timeout(Duration::from_millis(200)).is_err());

        driver.close_link();
        assert_eq!(next(&second_events), RadioEvent::Disconnected);
    }
}
