//! Fleet controller - the request surface offered to the router
//!
//! Every request is validated and routed to its handler. Validation failures
//! come back as `FleetError` and never touch the background workers.

use super::handlers::{self, HandlerContext};
use crate::config::FleetConfig;
use crate::drone::Drone;
use crate::error::FleetError;
use crate::pulse::PulseSocket;
use crate::registry::{FleetRegistry, SocketId};
use crate::store::{Log, MetricSample, Mission, Store};
use crate::tasks::heartbeat;
use fleet_shared::{DroneId, DroneType, MissionId, PositionOrientation};
use std::collections::HashMap;
use std::sync::Arc;

pub struct FleetController {
    ctx: HandlerContext,
}

impl FleetController {
    pub fn new(registry: Arc<FleetRegistry>, store: Arc<dyn Store>, config: FleetConfig) -> Self {
        Self {
            ctx: HandlerContext::new(registry, store, config),
        }
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.ctx.registry
    }

    // ---- drones ----

    pub async fn list_drones(&self, drone_type: Option<DroneType>) -> Vec<Drone> {
        handlers::handle_list_drones(&self.ctx, drone_type).await
    }

    pub async fn get_drone(&self, drone_id: DroneId) -> Result<Drone, FleetError> {
        handlers::handle_get_drone(&self.ctx, drone_id).await
    }

    pub async fn set_drone_position(
        &self,
        drone_id: DroneId,
        target: PositionOrientation,
    ) -> Result<Drone, FleetError> {
        handlers::handle_set_position(&self.ctx, drone_id, target).await
    }

    pub async fn identify_drone(&self, drone_id: DroneId) -> Result<Drone, FleetError> {
        handlers::handle_identify(&self.ctx, drone_id).await
    }

    // ---- missions ----

    pub async fn create_mission(&self, drone_type: DroneType) -> Result<Mission, FleetError> {
        handlers::handle_create_mission(&self.ctx, drone_type).await
    }

    pub async fn get_mission(&self, mission_id: MissionId) -> Result<Mission, FleetError> {
        handlers::handle_get_mission(&self.ctx, mission_id).await
    }

    pub async fn list_missions(&self) -> Result<Vec<Mission>, FleetError> {
        handlers::handle_list_missions(&self.ctx).await
    }

    pub async fn get_active_mission(&self, drone_type: DroneType) -> Result<Option<Mission>, FleetError> {
        handlers::handle_active_mission(&self.ctx, drone_type).await
    }

    pub async fn start_mission(&self, mission_id: MissionId) -> Result<Vec<Drone>, FleetError> {
        handlers::handle_start_mission(&self.ctx, mission_id).await
    }

    pub async fn end_mission(&self, mission_id: MissionId) -> Result<Vec<Drone>, FleetError> {
        handlers::handle_end_mission(&self.ctx, mission_id).await
    }

    pub async fn return_to_base(&self, mission_id: MissionId) -> Result<Vec<Drone>, FleetError> {
        handlers::handle_return_to_base(&self.ctx, mission_id).await
    }

    pub async fn activate_p2p(&self, mission_id: MissionId) -> Result<Vec<Drone>, FleetError> {
        handlers::handle_activate_p2p(&self.ctx, mission_id).await
    }

    pub async fn get_logs(&self, mission_id: MissionId, since_id: u64) -> Result<Vec<Log>, FleetError> {
        handlers::handle_logs(&self.ctx, mission_id, since_id).await
    }

    pub async fn get_drone_metrics(
        &self,
        mission_id: MissionId,
    ) -> Result<HashMap<DroneId, Vec<MetricSample>>, FleetError> {
        handlers::handle_drone_metrics(&self.ctx, mission_id).await
    }

    // ---- pulses ----

    /// Subscribe a socket to drone pulses and start watching its heartbeat
    pub async fn subscribe_pulses(&self, socket: Arc<dyn PulseSocket>) -> SocketId {
        let registry = &self.ctx.registry;
        let subscriber = registry.register_socket(socket).await;
        let socket_id = subscriber.id;

        let watcher = heartbeat::spawn(
            registry.clone(),
            subscriber,
            self.ctx.config.pulse.heartbeat_timeout(),
        );
        registry.register_worker(watcher).await;
        socket_id
    }
}
