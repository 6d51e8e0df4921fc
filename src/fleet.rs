//! Fleet setup
//!
//! Opens a link to every configured drone and registers the ones that answer.
//! A drone that cannot be reached is left out; the fleet starts without it.

use crate::config::FleetConfig;
use crate::drone::RegisteredDrone;
use crate::error::LinkError;
use crate::link::{DroneLink, RadioLink, StreamLink, UdpRadioDriver};
use crate::registry::FleetRegistry;
use fleet_shared::{timing, DroneId};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Connect to every configured drone concurrently
///
/// Returns the number of drones registered.
pub async fn initiate_links(registry: &Arc<FleetRegistry>, config: &FleetConfig) -> usize {
    let stream_timeout = Duration::from_millis(timing::STREAM_CONNECT_TIMEOUT_MS);
    let radio_timeout = config.crazyflie.connection_timeout();

    let mut pending: Vec<(String, Arc<dyn DroneLink>, DroneId, Duration)> = Vec::new();

    for address in config.argos.addresses() {
        let drone_id = registry.next_drone_id();
        let link: Arc<dyn DroneLink> =
            Arc::new(StreamLink::new(address.clone(), registry.link_sink(drone_id)));
        pending.push((address, link, drone_id, stream_timeout));
    }

    for uri in &config.crazyflie.uris {
        let drone_id = registry.next_drone_id();
        let driver = Arc::new(UdpRadioDriver::new());
        let link: Arc<dyn DroneLink> =
            Arc::new(RadioLink::new(uri.clone(), driver, registry.link_sink(drone_id)));
        pending.push((uri.clone(), link, drone_id, radio_timeout));
    }

    let results = join_all(pending.into_iter().map(|(address, link, drone_id, timeout)| async move {
        let result = connect_and_register(registry, drone_id, link, timeout).await;
        (address, result)
    }))
    .await;

    let mut registered = 0;
    for (address, result) in results {
        match result {
            Ok(()) => registered += 1,
            Err(e) => error!(%address, "Skipping drone: {}", e),
        }
    }

    info!(registered, "Drone links initiated");
    registered
}

async fn connect_and_register(
    registry: &FleetRegistry,
    drone_id: DroneId,
    link: Arc<dyn DroneLink>,
    timeout: Duration,
) -> Result<(), LinkError> {
    if let Err(e) = link.connect(timeout).await {
        link.terminate().await;
        return Err(e);
    }

    info!(drone_id, address = link.address(), "Drone link connected");
    registry
        .register_drone(RegisteredDrone::new(drone_id, link))
        .await;
    Ok(())
}
