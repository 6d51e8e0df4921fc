//! Outbound pulse broadcast
//!
//! Every drone snapshot on the pulse queue goes to all subscribed sockets at
//! once. A socket that cannot take it is unsubscribed and never retried.

use super::{guarded, BackgroundTask};
use crate::drone::Drone;
use crate::pulse::PulseError;
use crate::registry::{FleetRegistry, PulseSubscriber};
use futures::future::join_all;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const WORKER: &str = "outbound_pulse";

/// How each pulse send is confirmed
#[derive(Debug, Clone, Copy)]
pub struct Delivery {
    /// Wait for the client to answer every pulse
    pub wait_for_reply: bool,
    pub reply_timeout: Duration,
}

pub fn spawn(
    registry: Arc<FleetRegistry>,
    pulses: mpsc::UnboundedReceiver<Drone>,
    wait_for_reply: bool,
    reply_timeout: Duration,
) -> BackgroundTask {
    let delivery = Delivery {
        wait_for_reply,
        reply_timeout,
    };
    BackgroundTask::spawn(WORKER, move |cancel| run(registry, pulses, delivery, cancel))
}

async fn run(
    registry: Arc<FleetRegistry>,
    mut pulses: mpsc::UnboundedReceiver<Drone>,
    delivery: Delivery,
    cancel: CancellationToken,
) {
    loop {
        let pulse = tokio::select! {
            _ = cancel.cancelled() => break,
            next = pulses.recv() => match next {
                Some(pulse) => pulse,
                None => break,
            },
        };

        guarded(WORKER, async {
            broadcast(&registry, &pulse, delivery).await;
            Ok::<(), Infallible>(())
        })
        .await;
    }
}

/// Send one pulse to every subscriber, dropping the ones that fail
pub(crate) async fn broadcast(registry: &FleetRegistry, pulse: &Drone, delivery: Delivery) {
    let subscribers = registry.pulse_subscribers().await;
    if subscribers.is_empty() {
        return;
    }

    let results = join_all(
        subscribers
            .iter()
            .map(|subscriber| deliver(subscriber, pulse, delivery)),
    )
    .await;

    for (subscriber, result) in subscribers.iter().zip(results) {
        if let Err(e) = result {
            warn!(
                socket_id = subscriber.id,
                peer = %subscriber.socket.peer(),
                drone_id = pulse.id,
                "Unsubscribing pulse socket: {}",
                e
            );
            registry.unregister_socket(subscriber.id).await;
            subscriber.socket.close().await;
        }
    }
}

async fn deliver(
    subscriber: &PulseSubscriber,
    pulse: &Drone,
    delivery: Delivery,
) -> Result<(), PulseError> {
    // Subscribe before sending so a fast reply is not missed
    let mut replies = subscriber.watch_replies();
    subscriber.socket.send(pulse).await?;

    if !delivery.wait_for_reply {
        return Ok(());
    }
    match tokio::time::timeout(delivery.reply_timeout, replies.changed()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(PulseError::Disconnected),
        Err(_) => Err(PulseError::NoReply(delivery.reply_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drone::RegisteredDrone;
    use crate::link::mock::MockLink;
    use crate::pulse::{ChannelPulseSocket, PulseClient};
    use crate::tasks::heartbeat;
    use fleet_shared::DroneType;

    const NO_REPLY: Delivery = Delivery {
        wait_for_reply: false,
        reply_timeout: Duration::from_millis(50),
    };
    const WITH_REPLY: Delivery = Delivery {
        wait_for_reply: true,
        reply_timeout: Duration::from_millis(50),
    };

    fn pulse(id: u32) -> Drone {
        RegisteredDrone::new(id, MockLink::new(DroneType::Argos)).to_model()
    }

    async fn subscribe(registry: &FleetRegistry, peer: &str) -> (PulseSubscriber, PulseClient) {
        let (socket, client) = ChannelPulseSocket::pair(peer);
        (registry.register_socket(Arc::new(socket)).await, client)
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let registry = FleetRegistry::new();
        let (_, mut first) = subscribe(&registry, "first").await;
        let (_, mut second) = subscribe(&registry, "second").await;

        broadcast(&registry, &pulse(4), NO_REPLY).await;

        assert_eq!(first.next_pulse().await.unwrap().id, 4);
        assert_eq!(second.next_pulse().await.unwrap().id, 4);
        assert_eq!(registry.pulse_subscribers().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_socket_is_dropped() {
        let registry = FleetRegistry::new();
        let (_, mut alive) = subscribe(&registry, "alive").await;
        let (gone, gone_client) = subscribe(&registry, "gone").await;
        drop(gone_client);

        broadcast(&registry, &pulse(1), NO_REPLY).await;

        let remaining: Vec<_> = registry.pulse_subscribers().await.iter().map(|s| s.id).collect();
        assert!(!remaining.contains(&gone.id));
        assert_eq!(remaining.len(), 1);
        assert_eq!(alive.next_pulse().await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_reply_required_when_enabled() {
        let registry = FleetRegistry::new();
        let (silent, _silent_client) = subscribe(&registry, "silent").await;
        let (chatty, mut chatty_client) = subscribe(&registry, "chatty").await;
        let watcher = heartbeat::spawn(registry.clone(), chatty.clone(), Duration::from_secs(10));

        let answer = tokio::spawn(async move {
            let received = chatty_client.next_pulse().await;
            chatty_client.reply("ack");
            (received, chatty_client)
        });

        broadcast(&registry, &pulse(2), WITH_REPLY).await;
        let (received, _client) = answer.await.unwrap();
        assert_eq!(received.unwrap().id, 2);

        let remaining: Vec<_> = registry.pulse_subscribers().await.iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![chatty.id]);
        assert_ne!(silent.id, chatty.id);

        watcher.terminate().await;
    }
}
