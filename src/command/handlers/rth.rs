//! Return-to-base handler

use super::mission::request_termination;
use super::HandlerContext;
use crate::drone::Drone;
use crate::error::FleetError;
use fleet_shared::{Command, MissionId, MissionState};

/// Bring every drone of a started mission back to base
///
/// Like ending a mission, the mission is only marked ended once all of its
/// drones have landed.
pub async fn handle_return_to_base(
    ctx: &HandlerContext,
    mission_id: MissionId,
) -> Result<Vec<Drone>, FleetError> {
    request_termination(
        ctx,
        mission_id,
        MissionState::ReturnedToBase,
        Command::ReturnToBase,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::super::{handle_create_mission, handle_start_mission};
    use super::*;
    use crate::store::Store;
    use fleet_shared::DroneType;

    #[tokio::test]
    async fn test_return_to_base() {
        let (ctx, store, links) = context(&[DroneType::Argos]).await;
        let mission = handle_create_mission(&ctx, DroneType::Argos).await.unwrap();
        handle_start_mission(&ctx, mission.id).await.unwrap();

        handle_return_to_base(&ctx, mission.id).await.unwrap();

        assert_eq!(
            store.get_mission(mission.id).await.unwrap().state,
            MissionState::ReturnedToBase
        );
        assert_eq!(
            links[0].sent_commands(),
            vec![Command::StartExploration, Command::ReturnToBase]
        );
    }

    #[tokio::test]
    async fn test_return_to_base_requires_started() {
        let (ctx, _, links) = context(&[DroneType::Argos]).await;
        let mission = handle_create_mission(&ctx, DroneType::Argos).await.unwrap();

        let result = handle_return_to_base(&ctx, mission.id).await;
        match result {
            Err(FleetError::InvalidMissionState { allowed, .. }) => {
                assert_eq!(allowed, &[MissionState::Started]);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(links[0].sent_commands().is_empty());
    }
}
