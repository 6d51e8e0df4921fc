//! Inbound log dispatch
//!
//! Applies decoded telemetry to the registered drones in arrival order.

use super::{guarded, BackgroundTask};
use crate::drone::Drone;
use crate::error::FleetError;
use crate::registry::{FleetRegistry, LogRecord};
use fleet_shared::{DroneType, TelemetryMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const WORKER: &str = "inbound_log";

pub fn spawn(
    registry: Arc<FleetRegistry>,
    telemetry: mpsc::UnboundedReceiver<TelemetryMessage>,
) -> BackgroundTask {
    BackgroundTask::spawn(WORKER, |cancel| run(registry, telemetry, cancel))
}

async fn run(
    registry: Arc<FleetRegistry>,
    mut telemetry: mpsc::UnboundedReceiver<TelemetryMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            next = telemetry.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        guarded(WORKER, dispatch(&registry, message)).await;
    }
}

/// What a telemetry update changed, captured under the registry lock
struct Outcome {
    drone_type: DroneType,
    mission: Option<LogRecord>,
    landed: bool,
    pulse: Option<Drone>,
}

pub(crate) async fn dispatch(
    registry: &FleetRegistry,
    message: TelemetryMessage,
) -> Result<(), FleetError> {
    let outcome = registry
        .update_drone(message.drone_id, |drone| {
            drone.apply(&message);
            Outcome {
                drone_type: drone.drone_type(),
                mission: drone
                    .active_mission_id
                    .map(|mission_id| LogRecord::Metric(drone.metric_sample(mission_id))),
                landed: !drone.is_flying(),
                pulse: drone.should_emit_pulse().then(|| drone.to_model()),
            }
        })
        .await
        .ok_or(FleetError::DroneNotFound(message.drone_id))?;

    if let Some(record) = outcome.mission {
        if let LogRecord::Metric(sample) = &record {
            debug!(
                drone_id = sample.drone_id,
                mission_id = sample.mission_id,
                x = sample.position.x,
                y = sample.position.y,
                z = sample.position.z,
                "Mission telemetry"
            );
        }
        registry.enqueue_log(record);
    }

    if outcome.landed {
        registry.request_termination_check(outcome.drone_type);
    }

    if let Some(pulse) = outcome.pulse {
        registry.enqueue_pulse(pulse);
    }
    Ok(())
}
