//! Mission persistence
//!
//! The backend only talks to storage through the `Store` trait. `InMemoryStore`
//! backs the binary and the tests.

use async_trait::async_trait;
use fleet_shared::{
    now_ms, DroneId, DroneType, MissionId, MissionState, Orientation, Range, Vec3,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Mission {0} doesn't exist")]
    MissionNotFound(MissionId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub drone_type: DroneType,
    pub state: MissionState,
    pub total_distance: f64,
    /// Milliseconds since Unix epoch
    pub starting_time: u64,
    pub ending_time: Option<u64>,
}

/// A mission log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub id: u64,
    pub mission_id: MissionId,
    pub timestamp: u64,
    pub message: String,
}

/// One telemetry sample recorded for a drone during a mission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub drone_id: DroneId,
    pub mission_id: MissionId,
    pub position: Vec3,
    pub orientation: Orientation,
    pub range: Range,
}

/// Storage collaborator used by the workers and the fleet controller
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_mission(&self, drone_type: DroneType) -> StoreResult<Mission>;

    async fn get_mission(&self, mission_id: MissionId) -> StoreResult<Mission>;

    async fn list_missions(&self) -> StoreResult<Vec<Mission>>;

    /// Move a mission to `state`, optionally recording its final distance and end time
    async fn update_mission_state(
        &self,
        mission_id: MissionId,
        state: MissionState,
        total_distance: Option<f64>,
        ending_time: Option<u64>,
    ) -> StoreResult<Mission>;

    async fn insert_log(&self, mission_id: MissionId, timestamp: u64, message: String) -> StoreResult<()>;

    async fn record_metric(&self, sample: MetricSample) -> StoreResult<()>;

    /// Log entries of a mission with an id of at least `since_id`
    async fn get_logs(&self, mission_id: MissionId, since_id: u64) -> StoreResult<Vec<Log>>;

    async fn associate_drones(&self, mission_id: MissionId, drone_ids: &[DroneId]) -> StoreResult<()>;

    async fn get_drone_metrics(
        &self,
        mission_id: MissionId,
    ) -> StoreResult<HashMap<DroneId, Vec<MetricSample>>>;
}

#[derive(Default)]
struct Tables {
    missions: Vec<Mission>,
    logs: Vec<Log>,
    metrics: Vec<MetricSample>,
    associations: Vec<(DroneId, MissionId)>,
}

/// Store kept entirely in memory
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    /// When set, every write fails with `StoreError::Unavailable`
    fail_writes: AtomicBool,
    /// When set, only drone associations fail
    fail_associations: AtomicBool,
    /// Delay applied to mission reads, in milliseconds
    read_delay_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_associations(&self, fail: bool) {
        self.fail_associations.store(fail, Ordering::SeqCst);
    }

    /// Slow down every mission read, like a remote database would
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }

    /// Drones associated with a mission, in association order
    pub async fn mission_drones(&self, mission_id: MissionId) -> Vec<DroneId> {
        let tables = self.tables.read().await;
        tables
            .associations
            .iter()
            .filter(|(_, m)| *m == mission_id)
            .map(|(d, _)| *d)
            .collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_mission(&self, drone_type: DroneType) -> StoreResult<Mission> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let mission = Mission {
            id: tables.missions.len() as MissionId + 1,
            drone_type,
            state: MissionState::Created,
            total_distance: 0.0,
            starting_time: now_ms(),
            ending_time: None,
        };
        tables.missions.push(mission.clone());
        Ok(mission)
    }

    async fn get_mission(&self, mission_id: MissionId) -> StoreResult<Mission> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let tables = self.tables.read().await;
        tables
            .missions
            .iter()
            .find(|m| m.id == mission_id)
            .cloned()
            .ok_or(StoreError::MissionNotFound(mission_id))
    }

    async fn list_missions(&self) -> StoreResult<Vec<Mission>> {
        Ok(self.tables.read().await.missions.clone())
    }

    async fn update_mission_state(
        &self,
        mission_id: MissionId,
        state: MissionState,
        total_distance: Option<f64>,
        ending_time: Option<u64>,
    ) -> StoreResult<Mission> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let mission = tables
            .missions
            .iter_mut()
            .find(|m| m.id == mission_id)
            .ok_or(StoreError::MissionNotFound(mission_id))?;

        mission.state = state;
        if let Some(distance) = total_distance {
            mission.total_distance = distance;
        }
        if ending_time.is_some() {
            mission.ending_time = ending_time;
        }
        Ok(mission.clone())
    }

    async fn insert_log(&self, mission_id: MissionId, timestamp: u64, message: String) -> StoreResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let id = tables.logs.len() as u64 + 1;
        tables.logs.push(Log {
            id,
            mission_id,
            timestamp,
            message,
        });
        Ok(())
    }

    async fn record_metric(&self, sample: MetricSample) -> StoreResult<()> {
        self.check_writable()?;
        self.tables.write().await.metrics.push(sample);
        Ok(())
    }

    async fn get_logs(&self, mission_id: MissionId, since_id: u64) -> StoreResult<Vec<Log>> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .iter()
            .filter(|log| log.mission_id == mission_id && log.id >= since_id)
            .cloned()
            .collect())
    }

    async fn associate_drones(&self, mission_id: MissionId, drone_ids: &[DroneId]) -> StoreResult<()> {
        self.check_writable()?;
        if self.fail_associations.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("associations disabled".into()));
        }
        let mut tables = self.tables.write().await;
        tables
            .associations
            .extend(drone_ids.iter().map(|&drone_id| (drone_id, mission_id)));
        Ok(())
    }

    async fn get_drone_metrics(
        &self,
        mission_id: MissionId,
    ) -> StoreResult<HashMap<DroneId, Vec<MetricSample>>> {
        let tables = self.tables.read().await;
        let mut metrics: HashMap<DroneId, Vec<MetricSample>> = HashMap::new();
        for sample in tables.metrics.iter().filter(|s| s.mission_id == mission_id) {
            metrics.entry(sample.drone_id).or_default().push(*sample);
        }
        Ok(metrics)
    }
}
