//! Stream link for simulated drones
//!
//! Each simulated drone listens on its own TCP port. Telemetry comes back as
//! one JSON object per line; commands go out as a 4-byte code followed by
//! the newline sentinel.

use super::{wait_connected, DroneLink, LinkSink, LinkState};
use crate::error::LinkError;
use async_trait::async_trait;
use bytes::Bytes;
use fleet_shared::codec::{self, LineDecoder, Transport};
use fleet_shared::{now_ms, timing, Command, DroneType};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StreamLink {
    address: String,
    sink: LinkSink,
    writer: Mutex<Option<OwnedWriteHalf>>,
    state_tx: watch::Sender<LinkState>,
    cancel: CancellationToken,
    reader: StdMutex<Option<JoinHandle<()>>>,
    /// How long a command waits for the link to be connected
    send_timeout: Duration,
}

impl StreamLink {
    pub fn new(address: impl Into<String>, sink: LinkSink) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            address: address.into(),
            sink,
            writer: Mutex::new(None),
            state_tx,
            cancel: CancellationToken::new(),
            reader: StdMutex::new(None),
            send_timeout: Duration::from_millis(timing::STREAM_CONNECT_TIMEOUT_MS),
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }
}

#[async_trait]
impl DroneLink for StreamLink {
    fn drone_type(&self) -> DroneType {
        DroneType::Argos
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, timeout: Duration) -> Result<(), LinkError> {
        if self.cancel.is_cancelled() {
            return Err(LinkError::Terminated);
        }
        self.state_tx.send_replace(LinkState::Connecting);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state_tx.send_replace(LinkState::Disconnected);
                warn!(address = %self.address, error = %e, "Stream connection failed");
                return Err(LinkError::Connect(self.address.clone()));
            }
            Err(_) => {
                self.state_tx.send_replace(LinkState::Disconnected);
                return Err(LinkError::Timeout(self.address.clone()));
            }
        };

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        let handle = tokio::spawn(read_lines(
            reader,
            self.sink.clone(),
            self.state_tx.clone(),
            self.cancel.clone(),
        ));
        if let Ok(mut slot) = self.reader.lock() {
            *slot = Some(handle);
        }

        self.state_tx.send_replace(LinkState::Connected);
        info!(drone_id = self.sink.drone_id(), address = %self.address, "Stream link connected");
        Ok(())
    }

    async fn send_command(&self, command: Command, payload: Option<Bytes>) -> Result<(), LinkError> {
        wait_connected(self.state_tx.subscribe(), self.send_timeout, &self.address)
            .await
            .map_err(|e| match e {
                LinkError::Timeout(_) => LinkError::NotConnected,
                other => other,
            })?;

        let frame = codec::encode_command(Transport::Stream, command, payload.as_deref());

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(LinkError::NotConnected)?;
        if let Err(e) = writer.write_all(&frame).await {
            self.state_tx.send_replace(LinkState::Disconnected);
            return Err(e.into());
        }
        writer.flush().await?;

        debug!(drone_id = self.sink.drone_id(), %command, "Command written to stream");
        Ok(())
    }

    async fn terminate(&self) {
        if self.state_tx.send_replace(LinkState::Terminated) == LinkState::Terminated {
            return;
        }

        self.cancel.cancel();
        let reader = self.reader.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = reader {
            let _ = handle.await;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        info!(drone_id = self.sink.drone_id(), address = %self.address, "Stream link terminated");
    }

    fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }
}

/// Read telemetry lines until the stream ends or the link is cancelled
async fn read_lines(
    mut reader: OwnedReadHalf,
    sink: LinkSink,
    state_tx: watch::Sender<LinkState>,
    cancel: CancellationToken,
) {
    let drone_id = sink.drone_id();
    let mut decoder = LineDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            result = reader.read(&mut read_buf) => match result {
                Ok(n) => n,
                Err(e) => {
                    warn!(drone_id, error = %e, "Stream read failed");
                    break;
                }
            }
        };

        if n == 0 {
            if let Some(rest) = decoder.finish() {
                handle_line(&sink, &rest);
            }
            info!(drone_id, "Stream closed by drone");
            break;
        }

        decoder.extend(&read_buf[..n]);
        loop {
            match decoder.decode_next() {
                Ok(Some(line)) => handle_line(&sink, &line),
                Ok(None) => break,
                Err(e) => warn!(drone_id, error = %e, "Dropping telemetry"),
            }
        }
    }

    state_tx.send_if_modified(|state| {
        if *state == LinkState::Connected {
            *state = LinkState::Disconnected;
            true
        } else {
            false
        }
    });
}

fn handle_line(sink: &LinkSink, line: &[u8]) {
    if line.iter().all(u8::is_ascii_whitespace) {
        return;
    }

    match codec::decode_telemetry_line(sink.drone_id(), line, now_ms()) {
        Ok(message) => sink.telemetry(message),
        Err(e) => warn!(drone_id = sink.drone_id(), error = %e, "Dropping malformed telemetry line"),
    }
}
