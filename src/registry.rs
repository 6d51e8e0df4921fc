//! Fleet registry
//!
//! Single owner of the registered drones, the active mission of each drone
//! type, the queues feeding the background workers, the running workers and
//! the pulse subscribers. It is created once by the binary (or a test) and
//! passed by `Arc` to everything that needs it; `terminate_all` tears it down.

use crate::drone::{Drone, RegisteredDrone};
use crate::link::{DebugLine, DroneLink, LinkSink};
use crate::pulse::PulseSocket;
use crate::store::MetricSample;
use crate::tasks::BackgroundTask;
use fleet_shared::{DroneId, DroneType, MissionId, TelemetryMessage};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Identifier of a pulse subscriber
pub type SocketId = u64;

/// A record for the durable log writer
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Entry {
        mission_id: MissionId,
        timestamp: u64,
        message: String,
    },
    Metric(MetricSample),
}

/// Sending halves of the worker queues
#[derive(Clone)]
struct QueueSenders {
    telemetry: mpsc::UnboundedSender<TelemetryMessage>,
    debug: mpsc::UnboundedSender<DebugLine>,
    logging: mpsc::UnboundedSender<LogRecord>,
    termination: mpsc::UnboundedSender<DroneType>,
    pulses: mpsc::UnboundedSender<Drone>,
}

/// Receiving halves of the worker queues, handed out once
pub struct QueueReceivers {
    pub telemetry: mpsc::UnboundedReceiver<TelemetryMessage>,
    pub debug: mpsc::UnboundedReceiver<DebugLine>,
    pub logging: mpsc::UnboundedReceiver<LogRecord>,
    pub termination: mpsc::UnboundedReceiver<DroneType>,
    pub pulses: mpsc::UnboundedReceiver<Drone>,
}

fn create_queues() -> (QueueSenders, QueueReceivers) {
    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
    let (debug_tx, debug_rx) = mpsc::unbounded_channel();
    let (logging_tx, logging_rx) = mpsc::unbounded_channel();
    let (termination_tx, termination_rx) = mpsc::unbounded_channel();
    let (pulses_tx, pulses_rx) = mpsc::unbounded_channel();

    (
        QueueSenders {
            telemetry: telemetry_tx,
            debug: debug_tx,
            logging: logging_tx,
            termination: termination_tx,
            pulses: pulses_tx,
        },
        QueueReceivers {
            telemetry: telemetry_rx,
            debug: debug_rx,
            logging: logging_rx,
            termination: termination_rx,
            pulses: pulses_rx,
        },
    )
}

/// A subscribed pulse socket and the count of messages it sent back
#[derive(Clone)]
pub struct PulseSubscriber {
    pub id: SocketId,
    pub socket: Arc<dyn PulseSocket>,
    replies: Arc<watch::Sender<u64>>,
}

impl PulseSubscriber {
    /// Record a message received from the subscriber
    pub fn record_reply(&self) {
        self.replies.send_modify(|count| *count += 1);
    }

    /// Watch replies arriving after this call
    pub fn watch_replies(&self) -> watch::Receiver<u64> {
        self.replies.subscribe()
    }
}

pub struct FleetRegistry {
    drones: RwLock<HashMap<DroneId, RegisteredDrone>>,
    next_drone_id: AtomicU32,
    active_missions: RwLock<HashMap<DroneType, MissionId>>,
    mission_changes: Mutex<()>,
    queues: QueueSenders,
    receivers: std::sync::Mutex<Option<QueueReceivers>>,
    workers: Mutex<Vec<BackgroundTask>>,
    pulse_subscribers: RwLock<HashMap<SocketId, PulseSubscriber>>,
    next_socket_id: AtomicU64,
    terminated: AtomicBool,
}

impl FleetRegistry {
    /// Create the registry and its queues
    pub fn new() -> Arc<Self> {
        let (queues, receivers) = create_queues();

        Arc::new(Self {
            drones: RwLock::new(HashMap::new()),
            next_drone_id: AtomicU32::new(1),
            active_missions: RwLock::new(HashMap::new()),
            mission_changes: Mutex::new(()),
            queues,
            receivers: std::sync::Mutex::new(Some(receivers)),
            workers: Mutex::new(Vec::new()),
            pulse_subscribers: RwLock::new(HashMap::new()),
            next_socket_id: AtomicU64::new(1),
            terminated: AtomicBool::new(false),
        })
    }

    /// Hand the queue receivers to the workers. Only the first call gets them.
    pub fn take_queue_receivers(&self) -> Option<QueueReceivers> {
        self.receivers.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    // ---- drones ----

    /// Allocate the identity of a drone about to be registered
    pub fn next_drone_id(&self) -> DroneId {
        self.next_drone_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sink through which a link for `drone_id` delivers telemetry
    pub fn link_sink(&self, drone_id: DroneId) -> LinkSink {
        LinkSink::new(drone_id, self.queues.telemetry.clone(), self.queues.debug.clone())
    }

    pub async fn register_drone(&self, drone: RegisteredDrone) {
        info!(drone_id = drone.id, drone_type = %drone.drone_type(), "Drone registered");
        self.drones.write().await.insert(drone.id, drone);
    }

    pub async fn get_drone(&self, drone_id: DroneId) -> Option<Drone> {
        self.drones.read().await.get(&drone_id).map(RegisteredDrone::to_model)
    }

    /// Snapshots of every drone, optionally of one type, ordered by id
    pub async fn list_drones(&self, drone_type: Option<DroneType>) -> Vec<Drone> {
        let drones = self.drones.read().await;
        let mut models: Vec<Drone> = drones
            .values()
            .filter(|d| drone_type.map_or(true, |t| d.drone_type() == t))
            .map(RegisteredDrone::to_model)
            .collect();
        models.sort_by_key(|d| d.id);
        models
    }

    pub async fn drone_link(&self, drone_id: DroneId) -> Option<Arc<dyn DroneLink>> {
        self.drones.read().await.get(&drone_id).map(RegisteredDrone::link)
    }

    /// Links of every drone of a type, ordered by drone id
    pub async fn links_of_type(&self, drone_type: DroneType) -> Vec<(DroneId, Arc<dyn DroneLink>)> {
        let drones = self.drones.read().await;
        let mut links: Vec<_> = drones
            .values()
            .filter(|d| d.drone_type() == drone_type)
            .map(|d| (d.id, d.link()))
            .collect();
        links.sort_by_key(|(id, _)| *id);
        links
    }

    /// Mutate one drone under the registry lock
    pub async fn update_drone<R>(
        &self,
        drone_id: DroneId,
        f: impl FnOnce(&mut RegisteredDrone) -> R,
    ) -> Option<R> {
        self.drones.write().await.get_mut(&drone_id).map(f)
    }

    /// Mutate every drone of a type under the registry lock
    pub async fn update_drones_of_type(
        &self,
        drone_type: DroneType,
        mut f: impl FnMut(&mut RegisteredDrone),
    ) {
        let mut drones = self.drones.write().await;
        for drone in drones.values_mut().filter(|d| d.drone_type() == drone_type) {
            f(drone);
        }
    }

    pub async fn any_flying(&self, drone_type: DroneType) -> bool {
        self.drones
            .read()
            .await
            .values()
            .any(|d| d.drone_type() == drone_type && d.is_flying())
    }

    pub async fn total_distance(&self, drone_type: DroneType) -> f64 {
        self.drones
            .read()
            .await
            .values()
            .filter(|d| d.drone_type() == drone_type)
            .map(|d| d.total_distance)
            .sum()
    }

    // ---- missions ----

    pub async fn get_active_mission_id(&self, drone_type: DroneType) -> Option<MissionId> {
        self.active_missions.read().await.get(&drone_type).copied()
    }

    /// Serialize mission state changes
    ///
    /// Hold the guard from reading a mission's state until its new state is
    /// written, so two requests cannot both pass the same transition check.
    pub async fn lock_missions(&self) -> MutexGuard<'_, ()> {
        self.mission_changes.lock().await
    }

    /// Make `mission_id` the active mission of its drone type
    ///
    /// Fails with the id of the mission already active for that type.
    pub async fn activate_mission(
        &self,
        drone_type: DroneType,
        mission_id: MissionId,
    ) -> Result<(), MissionId> {
        let mut active = self.active_missions.write().await;
        if let Some(&current) = active.get(&drone_type) {
            return Err(current);
        }
        active.insert(drone_type, mission_id);
        Ok(())
    }

    /// Clear the active mission of a type if it is still `mission_id`
    pub async fn clear_active_mission_id(&self, drone_type: DroneType, mission_id: MissionId) -> bool {
        let mut active = self.active_missions.write().await;
        if active.get(&drone_type) == Some(&mission_id) {
            active.remove(&drone_type);
            true
        } else {
            false
        }
    }

    // ---- queues ----

    pub fn enqueue_telemetry(&self, message: TelemetryMessage) {
        if self.queues.telemetry.send(message).is_err() {
            debug!("Telemetry queue closed");
        }
    }

    pub fn enqueue_log(&self, record: LogRecord) {
        if self.queues.logging.send(record).is_err() {
            debug!("Logging queue closed");
        }
    }

    /// Ask the termination detector to re-check the active mission of a type
    pub fn request_termination_check(&self, drone_type: DroneType) {
        if self.queues.termination.send(drone_type).is_err() {
            debug!("Mission termination queue closed");
        }
    }

    pub fn enqueue_pulse(&self, drone: Drone) {
        if self.queues.pulses.send(drone).is_err() {
            debug!("Pulse queue closed");
        }
    }

    // ---- workers ----

    pub async fn register_worker(&self, worker: BackgroundTask) {
        let mut workers = self.workers.lock().await;
        workers.retain(|w| !w.is_finished());
        workers.push(worker);
    }

    pub async fn worker_names(&self) -> Vec<&'static str> {
        self.workers.lock().await.iter().map(BackgroundTask::name).collect()
    }

    // ---- pulse subscribers ----

    pub async fn register_socket(&self, socket: Arc<dyn PulseSocket>) -> PulseSubscriber {
        let id = self.next_socket_id.fetch_add(1, Ordering::SeqCst);
        let (replies, _) = watch::channel(0);
        let subscriber = PulseSubscriber {
            id,
            socket,
            replies: Arc::new(replies),
        };

        info!(socket_id = id, peer = %subscriber.socket.peer(), "Pulse subscriber registered");
        self.pulse_subscribers
            .write()
            .await
            .insert(id, subscriber.clone());
        subscriber
    }

    pub async fn unregister_socket(&self, socket_id: SocketId) -> Option<PulseSubscriber> {
        let removed = self.pulse_subscribers.write().await.remove(&socket_id);
        if let Some(subscriber) = &removed {
            info!(socket_id, peer = %subscriber.socket.peer(), "Pulse subscriber removed");
        }
        removed
    }

    pub async fn pulse_subscribers(&self) -> Vec<PulseSubscriber> {
        self.pulse_subscribers.read().await.values().cloned().collect()
    }

    // ---- teardown ----

    /// Cancel every worker, terminate every link and close every socket
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn terminate_all(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        let workers: Vec<BackgroundTask> = self.workers.lock().await.drain(..).collect();
        let worker_count = workers.len();
        join_all(workers.into_iter().map(BackgroundTask::terminate)).await;

        let links: Vec<(DroneId, Arc<dyn DroneLink>)> = self
            .drones
            .read()
            .await
            .values()
            .map(|d| (d.id, d.link()))
            .collect();
        join_all(links.iter().map(|(_, link)| link.terminate())).await;

        let subscribers: Vec<PulseSubscriber> = self
            .pulse_subscribers
            .write()
            .await
            .drain()
            .map(|(_, s)| s)
            .collect();
        join_all(subscribers.iter().map(|s| s.socket.close())).await;

        info!(
            workers = worker_count,
            links = links.len(),
            sockets = subscribers.len(),
            "Fleet terminated"
        );
    }
}
