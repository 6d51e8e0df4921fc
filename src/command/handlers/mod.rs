//! Request handlers behind the fleet controller

mod drone;
mod mission;
mod rth;
mod status;

pub use drone::{handle_identify, handle_set_position};
pub use mission::{handle_activate_p2p, handle_create_mission, handle_end_mission, handle_start_mission};
pub use rth::handle_return_to_base;
pub use status::{
    handle_active_mission, handle_drone_metrics, handle_get_drone, handle_get_mission,
    handle_list_drones, handle_list_missions, handle_logs,
};

use super::CommandDispatcher;
use crate::config::FleetConfig;
use crate::registry::FleetRegistry;
use crate::store::Store;
use std::sync::Arc;

/// Context passed to request handlers
pub struct HandlerContext {
    pub registry: Arc<FleetRegistry>,
    pub store: Arc<dyn Store>,
    pub dispatcher: CommandDispatcher,
    pub config: FleetConfig,
}

impl HandlerContext {
    pub fn new(registry: Arc<FleetRegistry>, store: Arc<dyn Store>, config: FleetConfig) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(registry.clone()),
            registry,
            store,
            config,
        }
    }
}
