//! Debug capture
//!
//! Console lines from drones taking part in a mission become mission log
//! entries. Lines from idle drones are only traced.

use super::{guarded, BackgroundTask};
use crate::error::FleetError;
use crate::link::DebugLine;
use crate::registry::{FleetRegistry, LogRecord};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const WORKER: &str = "debug_capture";

pub fn spawn(registry: Arc<FleetRegistry>, lines: mpsc::UnboundedReceiver<DebugLine>) -> BackgroundTask {
    BackgroundTask::spawn(WORKER, |cancel| run(registry, lines, cancel))
}

async fn run(
    registry: Arc<FleetRegistry>,
    mut lines: mpsc::UnboundedReceiver<DebugLine>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.recv() => match next {
                Some(line) => line,
                None => break,
            },
        };

        guarded(WORKER, capture(&registry, line)).await;
    }
}

async fn capture(registry: &FleetRegistry, line: DebugLine) -> Result<(), FleetError> {
    let mission_id = registry
        .update_drone(line.drone_id, |drone| drone.active_mission_id)
        .await
        .ok_or(FleetError::DroneNotFound(line.drone_id))?;

    debug!(drone_id = line.drone_id, "Drone console: {}", line.message);

    if let Some(mission_id) = mission_id {
        registry.enqueue_log(LogRecord::Entry {
            mission_id,
            timestamp: line.timestamp,
            message: line.message,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drone::RegisteredDrone;
    use crate::link::mock::MockLink;
    use fleet_shared::DroneType;
    use std::time::Duration;

    #[tokio::test]
    async fn test_only_mission_lines_are_logged() {
        let registry = FleetRegistry::new();
        let queues = registry.take_queue_receivers().unwrap();
        let mut logging = queues.logging;
        for _ in 0..2 {
            let id = registry.next_drone_id();
            registry
                .register_drone(RegisteredDrone::new(id, MockLink::new(DroneType::Crazyflie)))
                .await;
        }
        registry.update_drone(2, |d| d.join_mission(8)).await;

        let worker = spawn(registry.clone(), queues.debug);
        let sink_idle = registry.link_sink(1);
        let sink_busy = registry.link_sink(2);
        sink_idle.debug("idle line");
        registry.link_sink(99).debug("nobody");
        sink_busy.debug("busy line");

        let record = tokio::time::timeout(Duration::from_secs(1), logging.recv())
            .await
            .unwrap()
            .unwrap();
        match record {
            LogRecord::Entry { mission_id, message, .. } => {
                assert_eq!(mission_id, 8);
                assert_eq!(message, "busy line");
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert!(logging.try_recv().is_err());

        worker.terminate().await;
    }
}
