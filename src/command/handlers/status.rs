//! Read-only handlers: drones, missions, logs and metrics

use super::HandlerContext;
use crate::drone::Drone;
use crate::error::FleetError;
use crate::store::{Log, MetricSample, Mission};
use fleet_shared::{DroneId, DroneType, MissionId};
use std::collections::HashMap;

pub async fn handle_list_drones(ctx: &HandlerContext, drone_type: Option<DroneType>) -> Vec<Drone> {
    ctx.registry.list_drones(drone_type).await
}

pub async fn handle_get_drone(ctx: &HandlerContext, drone_id: DroneId) -> Result<Drone, FleetError> {
    ctx.registry
        .get_drone(drone_id)
        .await
        .ok_or(FleetError::DroneNotFound(drone_id))
}

pub async fn handle_get_mission(ctx: &HandlerContext, mission_id: MissionId) -> Result<Mission, FleetError> {
    Ok(ctx.store.get_mission(mission_id).await?)
}

pub async fn handle_list_missions(ctx: &HandlerContext) -> Result<Vec<Mission>, FleetError> {
    Ok(ctx.store.list_missions().await?)
}

/// The mission currently active for a drone type, if any
pub async fn handle_active_mission(
    ctx: &HandlerContext,
    drone_type: DroneType,
) -> Result<Option<Mission>, FleetError> {
    match ctx.registry.get_active_mission_id(drone_type).await {
        Some(mission_id) => Ok(Some(ctx.store.get_mission(mission_id).await?)),
        None => Ok(None),
    }
}

/// Mission log entries with an id of at least `since_id`
pub async fn handle_logs(
    ctx: &HandlerContext,
    mission_id: MissionId,
    since_id: u64,
) -> Result<Vec<Log>, FleetError> {
    Ok(ctx.store.get_logs(mission_id, since_id).await?)
}

pub async fn handle_drone_metrics(
    ctx: &HandlerContext,
    mission_id: MissionId,
) -> Result<HashMap<DroneId, Vec<MetricSample>>, FleetError> {
    Ok(ctx.store.get_drone_metrics(mission_id).await?)
}
