//! Durable log writer

use super::{guarded, BackgroundTask};
use crate::registry::LogRecord;
use crate::store::{Store, StoreError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WORKER: &str = "log_writer";

pub fn spawn(store: Arc<dyn Store>, records: mpsc::UnboundedReceiver<LogRecord>) -> BackgroundTask {
    BackgroundTask::spawn(WORKER, |cancel| run(store, records, cancel))
}

async fn run(
    store: Arc<dyn Store>,
    mut records: mpsc::UnboundedReceiver<LogRecord>,
    cancel: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            _ = cancel.cancelled() => break,
            next = records.recv() => match next {
                Some(record) => record,
                None => break,
            },
        };

        // A failed write is skipped, the next record is still attempted
        guarded(WORKER, write(store.as_ref(), record)).await;
    }
}

async fn write(store: &dyn Store, record: LogRecord) -> Result<(), StoreError> {
    match record {
        LogRecord::Entry {
            mission_id,
            timestamp,
            message,
        } => store.insert_log(mission_id, timestamp, message).await,
        LogRecord::Metric(sample) => store.record_metric(sample).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use fleet_shared::DroneType;
    use std::time::Duration;

    fn entry(mission_id: u32, message: &str) -> LogRecord {
        LogRecord::Entry {
            mission_id,
            timestamp: 10,
            message: message.to_string(),
        }
    }

    async fn wait_for_logs(store: &InMemoryStore, mission_id: u32, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while store.get_logs(mission_id, 0).await.unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_worker() {
        let store = Arc::new(InMemoryStore::new());
        let mission = store.create_mission(DroneType::Argos).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = spawn(store.clone(), rx);

        store.set_fail_writes(true);
        tx.send(entry(mission.id, "lost")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.set_fail_writes(false);
        tx.send(entry(mission.id, "kept")).unwrap();
        wait_for_logs(&store, mission.id, 1).await;

        let logs = store.get_logs(mission.id, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "kept");

        worker.terminate().await;
    }

    #[tokio::test]
    async fn test_records_written_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let mission = store.create_mission(DroneType::Crazyflie).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = spawn(store.clone(), rx);

        tx.send(entry(mission.id, "first")).unwrap();
        tx.send(entry(mission.id, "second")).unwrap();
        wait_for_logs(&store, mission.id, 2).await;

        let messages: Vec<String> = store
            .get_logs(mission.id, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.message)
            .collect();
        assert_eq!(messages, vec!["first", "second"]);

        worker.terminate().await;
    }
}
