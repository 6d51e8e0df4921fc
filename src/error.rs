//! Error types for links and fleet operations

use crate::store::StoreError;
use fleet_shared::{state_machine::InvalidTransition, DroneId, DroneType, MissionId, MissionState};
use thiserror::Error;

/// Failures of a single drone link
#[derive(Error, Debug)]
pub enum LinkError {
    /// The transport could not be opened
    #[error("Could not connect to drone on {0}")]
    Connect(String),

    /// The transport never reported itself connected
    #[error("Timed out waiting for connection to {0}")]
    Timeout(String),

    #[error("Link is not connected")]
    NotConnected,

    #[error("Link has been terminated")]
    Terminated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The radio driver rejected an operation
    #[error("Radio driver error: {0}")]
    Driver(String),
}

/// Request-level failures surfaced to the caller of the fleet controller
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Drone {0} not found")]
    DroneNotFound(DroneId),

    #[error("Operation requires {expected} drones, got {actual}")]
    WrongDroneType { expected: DroneType, actual: DroneType },

    #[error("Mission {0} not found")]
    MissionNotFound(MissionId),

    #[error("Mission {mission_id} is {current}, operation requires one of {allowed:?}")]
    InvalidMissionState {
        mission_id: MissionId,
        current: MissionState,
        allowed: &'static [MissionState],
    },

    #[error("Mission {active_mission_id} is already active for {drone_type} drones")]
    MissionAlreadyActive {
        drone_type: DroneType,
        active_mission_id: MissionId,
    },

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Persistence error: {0}")]
    Persistence(StoreError),
}

impl FleetError {
    pub(crate) fn invalid_transition(mission_id: MissionId, err: InvalidTransition) -> Self {
        FleetError::InvalidMissionState {
            mission_id,
            current: err.from,
            allowed: err.allowed,
        }
    }
}

impl From<StoreError> for FleetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissionNotFound(id) => FleetError::MissionNotFound(id),
            other => FleetError::Persistence(other),
        }
    }
}
