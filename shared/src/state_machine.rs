//! Flight and Mission State Machines
//!
//! Flight state is reported by the drone itself through telemetry; the table
//! here only decodes it and tells which reported transitions are expected.
//! Mission state is owned by the backend and guarded by `MissionState::transition`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Flight state of a single drone, as reported by its firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightState {
    #[default]
    NotReady,
    Ready,
    TakingOff,
    Landing,
    Hovering,
    Exploring,
    ReturningBase,
    Crashed,
}

impl FlightState {
    /// Decode the state code sent in telemetry
    pub fn from_code(code: u8) -> Option<FlightState> {
        use FlightState::*;

        match code {
            0 => Some(NotReady),
            1 => Some(Ready),
            2 => Some(TakingOff),
            3 => Some(Landing),
            4 => Some(Hovering),
            5 => Some(Exploring),
            6 => Some(ReturningBase),
            7 => Some(Crashed),
            _ => None,
        }
    }

    /// A drone is flying unless it is on the ground or crashed
    pub fn is_flying(self) -> bool {
        !matches!(self, FlightState::NotReady | FlightState::Ready | FlightState::Crashed)
    }

    /// Check if a reported transition follows the expected flight sequence
    pub fn can_transition_to(self, next: FlightState) -> bool {
        is_valid_transition(self, next)
    }
}

impl fmt::Display for FlightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlightState::NotReady => "NOT_READY",
            FlightState::Ready => "READY",
            FlightState::TakingOff => "TAKING_OFF",
            FlightState::Landing => "LANDING",
            FlightState::Hovering => "HOVERING",
            FlightState::Exploring => "EXPLORING",
            FlightState::ReturningBase => "RETURNING_BASE",
            FlightState::Crashed => "CRASHED",
        };
        f.write_str(name)
    }
}

/// Check if a transition from one flight state to another is expected
pub fn is_valid_transition(from: FlightState, to: FlightState) -> bool {
    use FlightState::*;

    match (from, to) {
        // Same state is always valid
        (a, b) if a == b => true,

        // Crash can be reached from anywhere
        (_, Crashed) => true,

        (NotReady, Ready) => true,
        (Ready, NotReady) => true,
        (Ready, TakingOff) => true,
        (TakingOff, Hovering | Exploring) => true,
        (Hovering, Exploring) | (Exploring, Hovering) => true,
        (Hovering | Exploring, Landing) => true,
        (Landing, Ready) => true,

        // Return to base can be triggered from any airborne state
        (TakingOff | Hovering | Exploring | Landing, ReturningBase) => true,
        (ReturningBase, Landing | Ready) => true,

        _ => false,
    }
}

/// Lifecycle of a mission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionState {
    #[default]
    Created,
    Started,
    PendingEnded,
    ReturnedToBase,
    Ended,
}

/// A mission transition was requested from a state that does not allow it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot move mission from {from} to {to}, allowed from: {allowed:?}")]
pub struct InvalidTransition {
    pub from: MissionState,
    pub to: MissionState,
    pub allowed: &'static [MissionState],
}

impl MissionState {
    /// States a mission may be in before entering `target`
    pub fn allowed_predecessors(target: MissionState) -> &'static [MissionState] {
        use MissionState::*;

        match target {
            Created => &[],
            Started => &[Created],
            PendingEnded | ReturnedToBase => &[Started],
            Ended => &[PendingEnded, ReturnedToBase],
        }
    }

    /// Validate a move to `to`, returning the new state
    pub fn transition(self, to: MissionState) -> Result<MissionState, InvalidTransition> {
        let allowed = Self::allowed_predecessors(to);
        if allowed.contains(&self) {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                allowed,
            })
        }
    }

    /// Termination was requested and the mission waits for its drones to land
    pub fn is_termination_requested(self) -> bool {
        matches!(self, MissionState::PendingEnded | MissionState::ReturnedToBase)
    }

    pub fn is_terminal(self) -> bool {
        self == MissionState::Ended
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissionState::Created => "CREATED",
            MissionState::Started => "STARTED",
            MissionState::PendingEnded => "PENDING_ENDED",
            MissionState::ReturnedToBase => "RETURNED_TO_BASE",
            MissionState::Ended => "ENDED",
        };
        f.write_str(name)
    }
}
