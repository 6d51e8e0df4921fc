//! Registered drone
//!
//! In-memory state of one fleet member. Flight state only changes when the
//! drone reports it; commands never set it.

use crate::link::DroneLink;
use crate::store::MetricSample;
use fleet_shared::{
    Battery, BatteryAndPosition, DroneId, DroneType, FlightState, MissionId, Orientation, Range,
    TelemetryMessage, TelemetryShape, Vec3,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Snapshot of a drone as seen by subscribers and API callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub id: DroneId,
    pub state: FlightState,
    #[serde(rename = "type")]
    pub drone_type: DroneType,
    pub battery: Battery,
    pub position: Vec3,
    pub orientation: Orientation,
    pub range: Range,
    pub total_distance: f64,
    pub active_mission_id: Option<MissionId>,
}

pub struct RegisteredDrone {
    pub id: DroneId,
    link: Arc<dyn DroneLink>,
    pub flight_state: FlightState,
    pub battery: Battery,
    pub position: Vec3,
    pub orientation: Orientation,
    pub range: Range,
    pub active_mission_id: Option<MissionId>,
    /// Distance flown during the active mission
    pub total_distance: f64,
    battery_and_position_updated: bool,
    range_updated: bool,
}

impl RegisteredDrone {
    pub fn new(id: DroneId, link: Arc<dyn DroneLink>) -> Self {
        Self {
            id,
            link,
            flight_state: FlightState::default(),
            battery: Battery::default(),
            position: Vec3::default(),
            orientation: Orientation::default(),
            range: Range::default(),
            active_mission_id: None,
            total_distance: 0.0,
            battery_and_position_updated: false,
            range_updated: false,
        }
    }

    /// Derived from the link, never stored
    pub fn drone_type(&self) -> DroneType {
        self.link.drone_type()
    }

    pub fn link(&self) -> Arc<dyn DroneLink> {
        self.link.clone()
    }

    pub fn is_flying(&self) -> bool {
        self.flight_state.is_flying()
    }

    /// Apply a telemetry report. The shape selects which fields change.
    pub fn apply(&mut self, message: &TelemetryMessage) {
        match &message.shape {
            TelemetryShape::BatteryAndPosition(update) => self.apply_battery_and_position(update),
            TelemetryShape::Range(range) => self.apply_range(range),
            TelemetryShape::Full(update, range) => {
                self.apply_battery_and_position(update);
                self.apply_range(range);
            }
        }
    }

    fn apply_battery_and_position(&mut self, update: &BatteryAndPosition) {
        self.battery = update.battery;

        if self.active_mission_id.is_some() {
            self.total_distance += self.position.distance_to(&update.position);
        }
        self.position = update.position;
        self.orientation = update.orientation;

        match FlightState::from_code(update.state_code) {
            Some(next) => {
                if !self.flight_state.can_transition_to(next) {
                    debug!(
                        drone_id = self.id,
                        from = %self.flight_state,
                        to = %next,
                        "Unexpected flight state transition"
                    );
                }
                self.flight_state = next;
            }
            None => warn!(drone_id = self.id, code = update.state_code, "Unknown flight state code"),
        }

        self.battery_and_position_updated = true;
    }

    fn apply_range(&mut self, range: &Range) {
        self.range = *range;
        self.range_updated = true;
    }

    /// Whether a pulse is due: both telemetry halves arrived since the last one
    pub fn should_emit_pulse(&mut self) -> bool {
        if self.battery_and_position_updated && self.range_updated {
            self.battery_and_position_updated = false;
            self.range_updated = false;
            return true;
        }
        false
    }

    /// Tag the drone with a newly started mission
    pub fn join_mission(&mut self, mission_id: MissionId) {
        self.active_mission_id = Some(mission_id);
        self.total_distance = 0.0;
    }

    pub fn leave_mission(&mut self) {
        self.active_mission_id = None;
    }

    pub fn metric_sample(&self, mission_id: MissionId) -> MetricSample {
        MetricSample {
            drone_id: self.id,
            mission_id,
            position: self.position,
            orientation: self.orientation,
            range: self.range,
        }
    }

    pub fn to_model(&self) -> Drone {
        Drone {
            id: self.id,
            state: self.flight_state,
            drone_type: self.drone_type(),
            battery: self.battery,
            position: self.position,
            orientation: self.orientation,
            range: self.range,
            total_distance: self.total_distance,
            active_mission_id: self.active_mission_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLink;

    fn drone() -> RegisteredDrone {
        RegisteredDrone::new(1, MockLink::new(DroneType::Argos))
    }

    fn position_update(x: f64, y: f64, z: f64, state_code: u8) -> TelemetryMessage {
        TelemetryMessage::new(
            1,
            0,
            TelemetryShape::BatteryAndPosition(BatteryAndPosition {
                battery: Battery { charge_percentage: 60 },
                position: Vec3::new(x, y, z),
                orientation: Orientation { yaw: 0.25 },
                state_code,
            }),
        )
    }

    fn range_update(value: u16) -> TelemetryMessage {
        TelemetryMessage::new(
            1,
            0,
            TelemetryShape::Range(Range {
                front: value,
                back: value,
                up: value,
                left: value,
                right: value,
                bottom: value,
            }),
        )
    }

    #[test]
    fn test_defaults() {
        let drone = drone();
        assert_eq!(drone.flight_state, FlightState::NotReady);
        assert_eq!(drone.position, Vec3::default());
        assert_eq!(drone.range, Range::default());
        assert_eq!(drone.drone_type(), DroneType::Argos);
        assert!(!drone.is_flying());
    }

    #[test]
    fn test_position_update_leaves_range_alone() {
        let mut drone = drone();
        drone.apply(&range_update(42));
        drone.apply(&position_update(1.0, 2.0, 3.0, 4));

        assert_eq!(drone.range.front, 42);
        assert_eq!(drone.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(drone.battery.charge_percentage, 60);
        assert_eq!(drone.flight_state, FlightState::Hovering);
    }

    #[test]
    fn test_range_update_leaves_position_alone() {
        let mut drone = drone();
        drone.apply(&position_update(1.0, 2.0, 3.0, 5));
        drone.apply(&range_update(7));

        assert_eq!(drone.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(drone.battery.charge_percentage, 60);
        assert_eq!(drone.flight_state, FlightState::Exploring);
        assert_eq!(drone.range.bottom, 7);
    }

    #[test]
    fn test_distance_only_accumulates_during_mission() {
        let mut drone = drone();
        drone.apply(&position_update(3.0, 4.0, 0.0, 4));
        assert_eq!(drone.total_distance, 0.0);

        drone.join_mission(2);
        drone.apply(&position_update(3.0, 4.0, 12.0, 5));
        drone.apply(&position_update(0.0, 0.0, 12.0, 5));
        assert!((drone.total_distance - 17.0).abs() < 1e-9);

        drone.join_mission(3);
        assert_eq!(drone.total_distance, 0.0);
        assert_eq!(drone.active_mission_id, Some(3));
    }

    #[test]
    fn test_unknown_state_code_keeps_state() {
        let mut drone = drone();
        drone.apply(&position_update(0.0, 0.0, 0.0, 1));
        drone.apply(&position_update(1.0, 0.0, 0.0, 42));

        assert_eq!(drone.flight_state, FlightState::Ready);
        assert_eq!(drone.position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_pulse_needs_both_halves() {
        let mut drone = drone();
        drone.apply(&position_update(0.0, 0.0, 0.0, 1));
        assert!(!drone.should_emit_pulse());

        drone.apply(&range_update(1));
        assert!(drone.should_emit_pulse());
        assert!(!drone.should_emit_pulse());

        let full = TelemetryMessage::new(
            1,
            0,
            TelemetryShape::Full(
                *position_update(0.0, 0.0, 0.0, 1).battery_and_position().unwrap(),
                Range::default(),
            ),
        );
        drone.apply(&full);
        assert!(drone.should_emit_pulse());
    }

    #[test]
    fn test_model_serialization() {
        let mut drone = drone();
        drone.join_mission(5);
        let json = serde_json::to_value(drone.to_model()).unwrap();

        assert_eq!(json["type"], "ARGOS");
        assert_eq!(json["state"], "NOT_READY");
        assert_eq!(json["active_mission_id"], 5);
    }
}
