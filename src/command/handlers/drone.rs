//! Single-drone handlers (set position, identify)

use super::HandlerContext;
use crate::drone::Drone;
use crate::error::FleetError;
use fleet_shared::codec::encode_position_payload;
use fleet_shared::{Command, DroneId, DroneType, PositionOrientation};

/// Send a target pose to one drone
///
/// The returned snapshot still holds the last reported position; the drone's
/// own telemetry moves it.
pub async fn handle_set_position(
    ctx: &HandlerContext,
    drone_id: DroneId,
    target: PositionOrientation,
) -> Result<Drone, FleetError> {
    ctx.dispatcher
        .send_to_drone(
            drone_id,
            Command::SetPosition,
            Some(encode_position_payload(&target)),
        )
        .await?;

    ctx.registry
        .get_drone(drone_id)
        .await
        .ok_or(FleetError::DroneNotFound(drone_id))
}

/// Flash the LEDs of a Crazyflie
pub async fn handle_identify(ctx: &HandlerContext, drone_id: DroneId) -> Result<Drone, FleetError> {
    let drone = ctx
        .registry
        .get_drone(drone_id)
        .await
        .ok_or(FleetError::DroneNotFound(drone_id))?;

    if drone.drone_type != DroneType::Crazyflie {
        return Err(FleetError::WrongDroneType {
            expected: DroneType::Crazyflie,
            actual: drone.drone_type,
        });
    }

    ctx.dispatcher
        .send_to_drone(drone_id, Command::Identify, None)
        .await?;
    Ok(drone)
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::*;
    use fleet_shared::codec::decode_position_payload;
    use fleet_shared::{Orientation, Vec3};

    #[tokio::test]
    async fn test_set_position_sends_payload() {
        let (ctx, _, links) = context(&[DroneType::Argos]).await;
        let target = PositionOrientation {
            position: Vec3::new(1.5, -2.0, 0.5),
            orientation: Orientation { yaw: 0.25 },
        };

        let drone = handle_set_position(&ctx, 1, target).await.unwrap();
        assert_eq!(drone.position, Vec3::default());

        let sent = links[0].sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Command::SetPosition);
        let payload = sent[0].1.as_ref().unwrap();
        assert_eq!(decode_position_payload(payload).unwrap(), target);
    }

    #[tokio::test]
    async fn test_set_position_unknown_drone() {
        let (ctx, _, _) = context(&[]).await;
        assert!(matches!(
            handle_set_position(&ctx, 5, PositionOrientation::default()).await,
            Err(FleetError::DroneNotFound(5))
        ));
    }

    #[tokio::test]
    async fn test_identify_crazyflie_only() {
        let (ctx, _, links) = context(&[DroneType::Argos, DroneType::Crazyflie]).await;

        assert!(matches!(
            handle_identify(&ctx, 1).await,
            Err(FleetError::WrongDroneType {
                actual: DroneType::Argos,
                ..
            })
        ));
        assert!(links[0].sent_commands().is_empty());

        let drone = handle_identify(&ctx, 2).await.unwrap();
        assert_eq!(drone.id, 2);
        assert_eq!(links[1].sent_commands(), vec![Command::Identify]);

        assert!(matches!(
            handle_identify(&ctx, 3).await,
            Err(FleetError::DroneNotFound(3))
        ));
    }
}
