//! Fleet Shared Protocol Types
//!
//! This crate provides the command codes, telemetry shapes, wire codec and
//! state machines shared by every drone link of the fleet backend.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::CodecError;
pub use state_machine::{FlightState, MissionState};

/// Identifier assigned to a drone when it joins the registry
pub type DroneId = u32;

/// Identifier assigned to a mission by the store
pub type MissionId = u32;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for links and subscribers
pub mod timing {
    /// Period of each radio log block
    pub const LOG_BLOCK_PERIOD_MS: u64 = 800;

    /// Time allowed for a radio link to report itself connected
    pub const RADIO_CONNECT_TIMEOUT_MS: u64 = 15_000;

    /// Time allowed for a TCP stream link to open
    pub const STREAM_CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Radio silence after which the link is reported lost
    pub const RADIO_LINK_LOST_TIMEOUT_MS: u64 = 3_000;

    /// Pulse sockets that stay silent this long are dropped
    pub const PULSE_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

    /// How long a pulse send waits for the client's reply
    pub const PULSE_REPLY_TIMEOUT_MS: u64 = 200;
}

/// Commands understood by both drone firmwares.
///
/// The discriminants are the wire values and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    TakeOff = 0,
    Land = 1,
    StartExploration = 2,
    ReturnToBase = 3,
    Identify = 4,
    ActivateP2p = 5,
    SetPosition = 6,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::TakeOff,
        Command::Land,
        Command::StartExploration,
        Command::ReturnToBase,
        Command::Identify,
        Command::ActivateP2p,
        Command::SetPosition,
    ];

    /// Wire value of this command
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::TakeOff => "TAKE_OFF",
            Command::Land => "LAND",
            Command::StartExploration => "START_EXPLORATION",
            Command::ReturnToBase => "RETURN_TO_BASE",
            Command::Identify => "IDENTIFY",
            Command::ActivateP2p => "ACTIVATE_P2P",
            Command::SetPosition => "SET_POSITION",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|command| command.code() == value)
            .ok_or(CodecError::UnknownCommand(value))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of drone, derived from the link that serves it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneType {
    /// Simulated drone reached over a TCP stream
    Argos,
    /// Physical drone reached over the radio
    Crazyflie,
}

impl fmt::Display for DroneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroneType::Argos => write!(f, "ARGOS"),
            DroneType::Crazyflie => write!(f, "CRAZYFLIE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Vec3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Battery {
    pub charge_percentage: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: f64,
}

/// Distances reported by the multi-ranger deck, in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub front: u16,
    pub back: u16,
    pub up: u16,
    pub left: u16,
    pub right: u16,
    pub bottom: u16,
}

/// Target pose carried by SET_POSITION
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionOrientation {
    pub position: Vec3,
    pub orientation: Orientation,
}

/// Battery, pose and flight state, as carried by the `battery_and_position` block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryAndPosition {
    pub battery: Battery,
    pub position: Vec3,
    pub orientation: Orientation,
    pub state_code: u8,
}

/// Which subset of a drone's telemetry a message carries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryShape {
    BatteryAndPosition(BatteryAndPosition),
    Range(Range),
    /// Both blocks at once, as sent by stream-linked drones
    Full(BatteryAndPosition, Range),
}

/// A decoded telemetry report for one drone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryMessage {
    pub drone_id: DroneId,
    pub timestamp: u64,
    pub shape: TelemetryShape,
}

impl TelemetryMessage {
    pub fn new(drone_id: DroneId, timestamp: u64, shape: TelemetryShape) -> Self {
        Self {
            drone_id,
            timestamp,
            shape,
        }
    }

    pub fn battery_and_position(&self) -> Option<&BatteryAndPosition> {
        match &self.shape {
            TelemetryShape::BatteryAndPosition(bp) | TelemetryShape::Full(bp, _) => Some(bp),
            TelemetryShape::Range(_) => None,
        }
    }

    pub fn range(&self) -> Option<&Range> {
        match &self.shape {
            TelemetryShape::Range(range) | TelemetryShape::Full(_, range) => Some(range),
            TelemetryShape::BatteryAndPosition(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_values() {
        assert_eq!(Command::TakeOff.code(), 0);
        assert_eq!(Command::Land.code(), 1);
        assert_eq!(Command::StartExploration.code(), 2);
        assert_eq!(Command::ReturnToBase.code(), 3);
        assert_eq!(Command::Identify.code(), 4);
        assert_eq!(Command::ActivateP2p.code(), 5);
        assert_eq!(Command::SetPosition.code(), 6);
    }

    #[test]
    fn test_command_from_unknown_code() {
        assert!(matches!(Command::try_from(7), Err(CodecError::UnknownCommand(7))));
        assert_eq!(Command::try_from(3).unwrap(), Command::ReturnToBase);
    }

    #[test]
    fn test_distance() {
        let origin = Vec3::default();
        assert!((origin.distance_to(&Vec3::new(3.0, 4.0, 0.0)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_drone_type_serialization() {
        assert_eq!(serde_json::to_string(&DroneType::Crazyflie).unwrap(), "\"CRAZYFLIE\"");
        let parsed: DroneType = serde_json::from_str("\"ARGOS\"").unwrap();
        assert_eq!(parsed, DroneType::Argos);
    }

    #[test]
    fn test_telemetry_shape_accessors() {
        let bp = BatteryAndPosition {
            battery: Battery { charge_percentage: 80 },
            position: Vec3::new(1.0, 2.0, 3.0),
            orientation: Orientation { yaw: 0.5 },
            state_code: 4,
        };
        let msg = TelemetryMessage::new(1, 0, TelemetryShape::BatteryAndPosition(bp));
        assert!(msg.battery_and_position().is_some());
        assert!(msg.range().is_none());

        let full = TelemetryMessage::new(1, 0, TelemetryShape::Full(bp, Range::default()));
        assert!(full.battery_and_position().is_some());
        assert!(full.range().is_some());
    }
}
