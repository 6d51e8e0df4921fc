//! Wire codec for both drone transports
//!
//! Commands are framed as:
//! ```text
//! radio:  [ 4 bytes: command (u32, little-endian) ][ optional payload ]
//! stream: [ 4 bytes: command (u32, little-endian) ][ optional payload ][ '\n' ]
//! ```
//!
//! Telemetry arrives either as named radio log blocks (little-endian values,
//! layout fixed per block) or as one JSON object per line on the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    timing, Battery, BatteryAndPosition, Command, DroneId, Orientation, PositionOrientation,
    Range, TelemetryMessage, TelemetryShape, Vec3,
};

/// Byte terminating every command frame on the stream transport
pub const STREAM_SENTINEL: u8 = b'\n';

/// Longest telemetry line accepted before the buffer is discarded
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Size of an encoded SET_POSITION payload (x, y, z, yaw as f32)
pub const POSITION_PAYLOAD_LEN: usize = 16;

pub const BATTERY_AND_POSITION_BLOCK: &str = "battery_and_position";
pub const RANGE_BLOCK: &str = "range";

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(#[from] serde_json::Error),

    #[error("Log block with name {0} is unknown")]
    UnknownLogBlock(String),

    #[error("Payload too short for {what}: need {needed} bytes, have {available}")]
    PayloadTooShort {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown command code: {0}")]
    UnknownCommand(u32),

    #[error("Stream command frame is missing its sentinel byte")]
    MissingSentinel,

    #[error("Telemetry line exceeds {MAX_LINE_LENGTH} bytes ({0} buffered)")]
    LineTooLong(usize),
}

/// The transport a frame is encoded for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Radio,
    Stream,
}

/// Encode a command frame for the given transport
pub fn encode_command(transport: Transport, command: Command, payload: Option<&[u8]>) -> Bytes {
    let payload = payload.unwrap_or_default();
    let mut buf = BytesMut::with_capacity(4 + payload.len() + 1);

    buf.put_u32_le(command.code());
    buf.put_slice(payload);

    if transport == Transport::Stream {
        buf.put_u8(STREAM_SENTINEL);
    }

    buf.freeze()
}

/// Decode a command frame, as the drone side would
///
/// Returns the command and whatever payload followed the code.
pub fn decode_command(transport: Transport, frame: &[u8]) -> Result<(Command, Bytes), CodecError> {
    let body = match transport {
        Transport::Radio => frame,
        Transport::Stream => match frame.split_last() {
            Some((&STREAM_SENTINEL, body)) => body,
            _ => return Err(CodecError::MissingSentinel),
        },
    };

    if body.len() < 4 {
        return Err(CodecError::PayloadTooShort {
            what: "command frame",
            needed: 4,
            available: body.len(),
        });
    }

    let mut cursor = body;
    let command = Command::try_from(cursor.get_u32_le())?;
    Ok((command, Bytes::copy_from_slice(cursor)))
}

/// Encode the SET_POSITION payload
pub fn encode_position_payload(target: &PositionOrientation) -> Bytes {
    let mut buf = BytesMut::with_capacity(POSITION_PAYLOAD_LEN);
    buf.put_f32_le(target.position.x as f32);
    buf.put_f32_le(target.position.y as f32);
    buf.put_f32_le(target.position.z as f32);
    buf.put_f32_le(target.orientation.yaw as f32);
    buf.freeze()
}

pub fn decode_position_payload(payload: &[u8]) -> Result<PositionOrientation, CodecError> {
    if payload.len() < POSITION_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooShort {
            what: "position payload",
            needed: POSITION_PAYLOAD_LEN,
            available: payload.len(),
        });
    }

    let mut cursor = payload;
    let x = cursor.get_f32_le() as f64;
    let y = cursor.get_f32_le() as f64;
    let z = cursor.get_f32_le() as f64;
    let yaw = cursor.get_f32_le() as f64;

    Ok(PositionOrientation {
        position: Vec3::new(x, y, z),
        orientation: Orientation { yaw },
    })
}

/// Storage type of a log variable on the drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    U8,
    U16,
    F32,
}

impl VarType {
    pub fn size(self) -> usize {
        match self {
            VarType::U8 => 1,
            VarType::U16 => 2,
            VarType::F32 => 4,
        }
    }

    /// Type identifier used when creating a block on the drone
    pub fn wire_id(self) -> u8 {
        match self {
            VarType::U8 => 1,
            VarType::U16 => 2,
            VarType::F32 => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogVariable {
    pub name: &'static str,
    pub fetch_as: VarType,
}

/// A periodic log block requested from a radio drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogBlockConfig {
    pub name: &'static str,
    pub period_ms: u64,
    pub variables: &'static [LogVariable],
}

impl LogBlockConfig {
    /// Number of value bytes in one sample of this block
    pub fn payload_len(&self) -> usize {
        self.variables.iter().map(|v| v.fetch_as.size()).sum()
    }
}

const fn var(name: &'static str, fetch_as: VarType) -> LogVariable {
    LogVariable { name, fetch_as }
}

/// The radio link's bandwidth forces telemetry to be split in two blocks
pub static LOG_BLOCKS: [LogBlockConfig; 2] = [
    LogBlockConfig {
        name: BATTERY_AND_POSITION_BLOCK,
        period_ms: timing::LOG_BLOCK_PERIOD_MS,
        variables: &[
            var("drone.state", VarType::U8),
            var("drone.batteryLevel", VarType::U8),
            var("kalman.stateX", VarType::F32),
            var("kalman.stateY", VarType::F32),
            var("kalman.stateZ", VarType::F32),
            var("stateEstimate.yaw", VarType::F32),
        ],
    },
    LogBlockConfig {
        name: RANGE_BLOCK,
        period_ms: timing::LOG_BLOCK_PERIOD_MS,
        variables: &[
            var("range.front", VarType::U16),
            var("range.back", VarType::U16),
            var("range.up", VarType::U16),
            var("range.left", VarType::U16),
            var("range.right", VarType::U16),
            var("range.zrange", VarType::U16),
        ],
    },
];

/// Look up a log block layout by name
pub fn log_block(name: &str) -> Option<&'static LogBlockConfig> {
    LOG_BLOCKS.iter().find(|block| block.name == name)
}

/// Decode one sample of a named radio log block
///
/// The block name selects the telemetry shape; unknown names are rejected.
pub fn decode_log_block(
    drone_id: DroneId,
    block_name: &str,
    timestamp: u64,
    payload: &[u8],
) -> Result<TelemetryMessage, CodecError> {
    let config =
        log_block(block_name).ok_or_else(|| CodecError::UnknownLogBlock(block_name.to_string()))?;

    let needed = config.payload_len();
    if payload.len() < needed {
        return Err(CodecError::PayloadTooShort {
            what: config.name,
            needed,
            available: payload.len(),
        });
    }

    let mut cursor = payload;
    let shape = match config.name {
        BATTERY_AND_POSITION_BLOCK => {
            let state_code = cursor.get_u8();
            let charge_percentage = cursor.get_u8();
            let x = cursor.get_f32_le() as f64;
            let y = cursor.get_f32_le() as f64;
            let z = cursor.get_f32_le() as f64;
            let yaw = cursor.get_f32_le() as f64;

            TelemetryShape::BatteryAndPosition(BatteryAndPosition {
                battery: Battery { charge_percentage },
                position: Vec3::new(x, y, z),
                orientation: Orientation { yaw },
                state_code,
            })
        }
        _ => TelemetryShape::Range(Range {
            front: cursor.get_u16_le(),
            back: cursor.get_u16_le(),
            up: cursor.get_u16_le(),
            left: cursor.get_u16_le(),
            right: cursor.get_u16_le(),
            bottom: cursor.get_u16_le(),
        }),
    };

    Ok(TelemetryMessage::new(drone_id, timestamp, shape))
}

/// One telemetry line from a stream-linked drone: both blocks at once
#[derive(Debug, Clone, Deserialize)]
struct StreamTelemetryFrame {
    #[serde(default)]
    timestamp: Option<u64>,
    drone_state: u8,
    drone_battery_level: u8,
    kalman_state_x: f64,
    kalman_state_y: f64,
    kalman_state_z: f64,
    state_estimate_yaw: f64,
    range_front: u16,
    range_back: u16,
    range_up: u16,
    range_left: u16,
    range_right: u16,
    range_zrange: u16,
}

/// Decode one JSON telemetry line from a stream-linked drone
///
/// `drone_id` is the registry identity of the link the line came from; any
/// `droneId` field inside the line is ignored. `received_at` is used when
/// the line carries no timestamp.
pub fn decode_telemetry_line(
    drone_id: DroneId,
    line: &[u8],
    received_at: u64,
) -> Result<TelemetryMessage, CodecError> {
    let frame: StreamTelemetryFrame = serde_json::from_slice(line)?;

    let battery_and_position = BatteryAndPosition {
        battery: Battery {
            charge_percentage: frame.drone_battery_level,
        },
        position: Vec3::new(frame.kalman_state_x, frame.kalman_state_y, frame.kalman_state_z),
        orientation: Orientation {
            yaw: frame.state_estimate_yaw,
        },
        state_code: frame.drone_state,
    };
    let range = Range {
        front: frame.range_front,
        back: frame.range_back,
        up: frame.range_up,
        left: frame.range_left,
        right: frame.range_right,
        bottom: frame.range_zrange,
    };

    Ok(TelemetryMessage::new(
        drone_id,
        frame.timestamp.unwrap_or(received_at),
        TelemetryShape::Full(battery_and_position, range),
    ))
}

/// Reassembles newline-delimited lines from arbitrary read chunks
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to take the next complete line, without its terminator
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete
    /// lines. An over-long partial line is discarded and reported once.
    pub fn decode_next(&mut self) -> Result<Option<Bytes>, CodecError> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(end) => {
                let mut line = self.buffer.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                Ok(Some(line.freeze()))
            }
            None if self.buffer.len() > MAX_LINE_LENGTH => {
                let discarded = self.buffer.len();
                self.buffer.clear();
                Err(CodecError::LineTooLong(discarded))
            }
            None => Ok(None),
        }
    }

    /// Take whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
