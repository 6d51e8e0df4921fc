//! Command dispatcher - sends commands to one drone or to a whole drone type

use crate::error::{FleetError, LinkError};
use crate::registry::{FleetRegistry, LogRecord};
use bytes::Bytes;
use fleet_shared::{now_ms, Command, DroneId, DroneType, MissionId};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CommandDispatcher {
    registry: Arc<FleetRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<FleetRegistry>) -> Self {
        Self { registry }
    }

    /// Send a command to a single drone
    pub async fn send_to_drone(
        &self,
        drone_id: DroneId,
        command: Command,
        payload: Option<Bytes>,
    ) -> Result<(), FleetError> {
        let link = self
            .registry
            .drone_link(drone_id)
            .await
            .ok_or(FleetError::DroneNotFound(drone_id))?;

        link.send_command(command, payload).await?;
        info!(drone_id, %command, "Sent command");
        Ok(())
    }

    /// Send a command to every drone of a type
    ///
    /// All sends run concurrently and are awaited before returning. If any
    /// of them fails the whole broadcast fails with the first error, in drone
    /// id order. On success the command is recorded in the mission log when
    /// `mission_id` is given. Returns the ids of the targeted drones.
    pub async fn broadcast(
        &self,
        drone_type: DroneType,
        command: Command,
        mission_id: Option<MissionId>,
    ) -> Result<Vec<DroneId>, FleetError> {
        let links = self.registry.links_of_type(drone_type).await;
        let drone_ids: Vec<DroneId> = links.iter().map(|(id, _)| *id).collect();

        let results = join_all(links.iter().map(|(_, link)| link.send_command(command, None))).await;

        let mut first_error: Option<LinkError> = None;
        for (drone_id, result) in drone_ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(drone_id, %command, "Failed to send command: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e.into());
        }

        let message = format!("Sent {} to drones {:?}", command, drone_ids);
        info!(%drone_type, "{}", message);
        if let Some(mission_id) = mission_id {
            self.registry.enqueue_log(LogRecord::Entry {
                mission_id,
                timestamp: now_ms(),
                message,
            });
        }
        Ok(drone_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drone::RegisteredDrone;
    use crate::link::mock::MockLink;

    async fn register(registry: &FleetRegistry, link: Arc<MockLink>) -> DroneId {
        let id = registry.next_drone_id();
        registry.register_drone(RegisteredDrone::new(id, link)).await;
        id
    }

    #[tokio::test]
    async fn test_send_to_drone() {
        let registry = FleetRegistry::new();
        let link = MockLink::new(DroneType::Crazyflie);
        let id = register(&registry, link.clone()).await;
        let dispatcher = CommandDispatcher::new(registry);

        dispatcher
            .send_to_drone(id, Command::SetPosition, Some(Bytes::from_static(&[1, 2])))
            .await
            .unwrap();
        assert_eq!(
            link.sent(),
            vec![(Command::SetPosition, Some(Bytes::from_static(&[1, 2])))]
        );

        assert!(matches!(
            dispatcher.send_to_drone(99, Command::Identify, None).await,
            Err(FleetError::DroneNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_targets_one_type_and_logs() {
        let registry = FleetRegistry::new();
        let mut queues = registry.take_queue_receivers().unwrap();
        let argos_a = MockLink::new(DroneType::Argos);
        let crazyflie = MockLink::new(DroneType::Crazyflie);
        let argos_b = MockLink::new(DroneType::Argos);
        register(&registry, argos_a.clone()).await;
        register(&registry, crazyflie.clone()).await;
        register(&registry, argos_b.clone()).await;
        let dispatcher = CommandDispatcher::new(registry);

        let ids = dispatcher
            .broadcast(DroneType::Argos, Command::Land, Some(6))
            .await
            .unwrap();

        assert_eq!(ids, vec![1, 3]);
        assert_eq!(argos_a.sent_commands(), vec![Command::Land]);
        assert_eq!(argos_b.sent_commands(), vec![Command::Land]);
        assert!(crazyflie.sent_commands().is_empty());
        match queues.logging.try_recv().unwrap() {
            LogRecord::Entry { mission_id, message, .. } => {
                assert_eq!(mission_id, 6);
                assert_eq!(message, "Sent LAND to drones [1, 3]");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_fails_as_a_whole() {
        let registry = FleetRegistry::new();
        let mut queues = registry.take_queue_receivers().unwrap();
        let healthy = MockLink::new(DroneType::Crazyflie);
        register(&registry, healthy.clone()).await;
        register(&registry, MockLink::failing(DroneType::Crazyflie)).await;
        let dispatcher = CommandDispatcher::new(registry);

        let result = dispatcher
            .broadcast(DroneType::Crazyflie, Command::ActivateP2p, Some(2))
            .await;

        assert!(matches!(result, Err(FleetError::Link(_))));
        // Every send is still attempted
        assert_eq!(healthy.sent_commands(), vec![Command::ActivateP2p]);
        assert!(queues.logging.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_drones() {
        let registry = FleetRegistry::new();
        let dispatcher = CommandDispatcher::new(registry);

        let ids = dispatcher
            .broadcast(DroneType::Argos, Command::TakeOff, None)
            .await
            .unwrap();
        assert!(ids.is_empty());
    }
}
