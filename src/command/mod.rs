//! Command dispatch and mission control for the fleet
//!
//! This module handles:
//! - Validating router requests against drone and mission state
//! - Driving the mission state machine
//! - Sending commands to one drone or to every drone of a type

mod controller;
mod dispatcher;
pub mod handlers;

pub use controller::FleetController;
pub use dispatcher::CommandDispatcher;
