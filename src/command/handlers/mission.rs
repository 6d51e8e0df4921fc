//! Mission handlers (create, start, end, p2p)

use super::HandlerContext;
use crate::drone::Drone;
use crate::error::FleetError;
use crate::store::{Mission, StoreError};
use fleet_shared::{Command, DroneId, DroneType, MissionId, MissionState};
use tracing::info;

pub async fn handle_create_mission(
    ctx: &HandlerContext,
    drone_type: DroneType,
) -> Result<Mission, FleetError> {
    let mission = ctx.store.create_mission(drone_type).await?;
    info!(mission_id = mission.id, %drone_type, "Mission created");
    Ok(mission)
}

/// Start a created mission on every drone of its type
///
/// Only one mission per drone type can be active. The selected drones have
/// their distance reset and are told to start exploring.
pub async fn handle_start_mission(
    ctx: &HandlerContext,
    mission_id: MissionId,
) -> Result<Vec<Drone>, FleetError> {
    let guard = ctx.registry.lock_missions().await;
    let mission = ctx.store.get_mission(mission_id).await?;
    mission
        .state
        .transition(MissionState::Started)
        .map_err(|e| FleetError::invalid_transition(mission_id, e))?;

    let drone_type = mission.drone_type;
    ctx.registry
        .activate_mission(drone_type, mission_id)
        .await
        .map_err(|active_mission_id| FleetError::MissionAlreadyActive {
            drone_type,
            active_mission_id,
        })?;

    let drone_ids: Vec<DroneId> = ctx
        .registry
        .list_drones(Some(drone_type))
        .await
        .iter()
        .map(|d| d.id)
        .collect();
    if let Err(e) = record_start(ctx, mission_id, &drone_ids).await {
        ctx.registry.clear_active_mission_id(drone_type, mission_id).await;
        return Err(e.into());
    }
    ctx.registry
        .update_drones_of_type(drone_type, |drone| drone.join_mission(mission_id))
        .await;
    drop(guard);

    info!(mission_id, %drone_type, drones = drone_ids.len(), "Mission started");
    ctx.dispatcher
        .broadcast(drone_type, Command::StartExploration, Some(mission_id))
        .await?;

    Ok(ctx.registry.list_drones(Some(drone_type)).await)
}

/// Persist the drone associations, then the STARTED state
async fn record_start(
    ctx: &HandlerContext,
    mission_id: MissionId,
    drone_ids: &[DroneId],
) -> Result<(), StoreError> {
    ctx.store.associate_drones(mission_id, drone_ids).await?;
    ctx.store
        .update_mission_state(mission_id, MissionState::Started, None, None)
        .await?;
    Ok(())
}

/// Land every drone of the mission's type; the mission ends once they are down
pub async fn handle_end_mission(
    ctx: &HandlerContext,
    mission_id: MissionId,
) -> Result<Vec<Drone>, FleetError> {
    request_termination(ctx, mission_id, MissionState::PendingEnded, Command::Land).await
}

/// Move a started mission to `target` and send `command` to its drones
pub(super) async fn request_termination(
    ctx: &HandlerContext,
    mission_id: MissionId,
    target: MissionState,
    command: Command,
) -> Result<Vec<Drone>, FleetError> {
    let guard = ctx.registry.lock_missions().await;
    let mission = ctx.store.get_mission(mission_id).await?;
    mission
        .state
        .transition(target)
        .map_err(|e| FleetError::invalid_transition(mission_id, e))?;

    let drone_type = mission.drone_type;
    ctx.store
        .update_mission_state(mission_id, target, None, None)
        .await?;
    drop(guard);
    info!(mission_id, %drone_type, state = %target, "Mission termination requested");

    ctx.dispatcher
        .broadcast(drone_type, command, Some(mission_id))
        .await?;

    // Drones already on the ground will not report a landing
    ctx.registry.request_termination_check(drone_type);

    Ok(ctx.registry.list_drones(Some(drone_type)).await)
}

/// Enable peer-to-peer communication between the drones of a Crazyflie mission
pub async fn handle_activate_p2p(
    ctx: &HandlerContext,
    mission_id: MissionId,
) -> Result<Vec<Drone>, FleetError> {
    let mission = ctx.store.get_mission(mission_id).await?;
    if mission.drone_type != DroneType::Crazyflie {
        return Err(FleetError::WrongDroneType {
            expected: DroneType::Crazyflie,
            actual: mission.drone_type,
        });
    }

    ctx.dispatcher
        .broadcast(DroneType::Crazyflie, Command::ActivateP2p, Some(mission_id))
        .await?;
    Ok(ctx.registry.list_drones(Some(DroneType::Crazyflie)).await)
}
