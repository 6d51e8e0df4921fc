//! Mission termination detector
//!
//! A mission whose termination was requested only ends once every drone of
//! its type is back on the ground. Each token on the queue triggers one
//! check; a check that finds a drone still flying is simply dropped, the next
//! telemetry update of a landed drone requests a new one.

use super::{guarded, BackgroundTask};
use crate::error::FleetError;
use crate::registry::FleetRegistry;
use crate::store::Store;
use fleet_shared::{now_ms, DroneType, MissionState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const WORKER: &str = "mission_termination";

pub fn spawn(
    registry: Arc<FleetRegistry>,
    store: Arc<dyn Store>,
    checks: mpsc::UnboundedReceiver<DroneType>,
) -> BackgroundTask {
    BackgroundTask::spawn(WORKER, |cancel| run(registry, store, checks, cancel))
}

async fn run(
    registry: Arc<FleetRegistry>,
    store: Arc<dyn Store>,
    mut checks: mpsc::UnboundedReceiver<DroneType>,
    cancel: CancellationToken,
) {
    loop {
        let drone_type = tokio::select! {
            _ = cancel.cancelled() => break,
            next = checks.recv() => match next {
                Some(drone_type) => drone_type,
                None => break,
            },
        };

        guarded(WORKER, check(&registry, store.as_ref(), drone_type)).await;
    }
}

/// End the active mission of `drone_type` if it is waiting for its drones to land
pub(crate) async fn check(
    registry: &FleetRegistry,
    store: &dyn Store,
    drone_type: DroneType,
) -> Result<(), FleetError> {
    let Some(mission_id) = registry.get_active_mission_id(drone_type).await else {
        return Ok(());
    };

    if registry.any_flying(drone_type).await {
        debug!(mission_id, %drone_type, "Drones still flying, mission continues");
        return Ok(());
    }

    let _guard = registry.lock_missions().await;
    let mission = store.get_mission(mission_id).await?;
    if !mission.state.is_termination_requested() {
        return Ok(());
    }
    mission
        .state
        .transition(MissionState::Ended)
        .map_err(|e| FleetError::invalid_transition(mission_id, e))?;

    let total_distance = registry.total_distance(drone_type).await;
    store
        .update_mission_state(mission_id, MissionState::Ended, Some(total_distance), Some(now_ms()))
        .await?;

    registry.clear_active_mission_id(drone_type, mission_id).await;
    registry
        .update_drones_of_type(drone_type, |drone| {
            if drone.active_mission_id == Some(mission_id) {
                drone.leave_mission();
            }
        })
        .await;

    info!(mission_id, %drone_type, total_distance, "Mission ended");
    Ok(())
}
