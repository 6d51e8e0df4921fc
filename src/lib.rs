//! Fleet coordination backend
//!
//! Keeps one link per drone, turns their telemetry into drone state, runs
//! missions over whole drone types and pushes drone snapshots to subscribers.

pub mod command;
pub mod config;
pub mod drone;
pub mod error;
pub mod fleet;
pub mod link;
pub mod pulse;
pub mod registry;
pub mod store;
pub mod tasks;

pub use command::{CommandDispatcher, FleetController};
pub use config::FleetConfig;
pub use drone::{Drone, RegisteredDrone};
pub use error::{FleetError, LinkError};
pub use registry::FleetRegistry;
pub use store::{InMemoryStore, Store};
