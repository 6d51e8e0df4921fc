//! Background workers
//!
//! Each worker drains one registry queue until cancelled. Cancellation is the
//! normal shutdown path and ends a worker quietly; any other failure in a
//! single item is logged and the loop carries on.

pub mod debug_capture;
pub mod heartbeat;
pub mod inbound_log;
pub mod log_writer;
pub mod mission_termination;
pub mod outbound_pulse;

use crate::config::FleetConfig;
use crate::registry::FleetRegistry;
use crate::store::Store;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum StartError {
    #[error("Worker queues were already handed out")]
    QueuesTaken,
}

/// A spawned, cancellable task
pub struct BackgroundTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `f` with a fresh cancellation token
    pub fn spawn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = Some(tokio::spawn(f(cancel.clone())));

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the task and wait for it to stop
    pub async fn terminate(mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(()) => info!(worker = self.name, "Worker stopped"),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(worker = self.name, "Worker task failed: {}", e),
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run one unit of worker work, logging an error or a panic instead of
/// letting it end the worker
pub(crate) async fn guarded<Fut, E>(worker: &'static str, work: Fut)
where
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(worker, "Failed to process item: {}", e),
        Err(_) => error!(worker, "Worker panicked while processing item"),
    }
}

/// Spawn the queue workers and hand them to the registry
pub async fn start_workers(
    registry: &Arc<FleetRegistry>,
    store: Arc<dyn Store>,
    config: &FleetConfig,
) -> Result<(), StartError> {
    let queues = registry
        .take_queue_receivers()
        .ok_or(StartError::QueuesTaken)?;

    let workers = vec![
        inbound_log::spawn(registry.clone(), queues.telemetry),
        debug_capture::spawn(registry.clone(), queues.debug),
        log_writer::spawn(store.clone(), queues.logging),
        mission_termination::spawn(registry.clone(), store, queues.termination),
        outbound_pulse::spawn(
            registry.clone(),
            queues.pulses,
            config.crazyflie.enable_pulse_heartbeat,
            config.pulse.reply_timeout(),
        ),
    ];

    for worker in workers {
        info!(worker = worker.name(), "Worker started");
        registry.register_worker(worker).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_terminate_cancels_task() {
        let task = BackgroundTask::spawn("idle", |cancel| async move {
            cancel.cancelled().await;
        });
        assert_eq!(task.name(), "idle");
        assert!(!task.is_finished());

        tokio::time::timeout(Duration::from_secs(1), task.terminate())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_guarded_survives_error_and_panic() {
        let processed = Arc::new(AtomicUsize::new(0));

        guarded("test", async { Err::<(), _>("bad item") }).await;
        guarded("test", async {
            if processed.load(Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok::<(), String>(())
        })
        .await;

        let counter = processed.clone();
        guarded("test", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .await;
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_workers_once() {
        let registry = FleetRegistry::new();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let config = FleetConfig::default();

        start_workers(&registry, store.clone(), &config).await.unwrap();
        let mut names = registry.worker_names().await;
        names.sort();
        assert_eq!(
            names,
            vec![
                "debug_capture",
                "inbound_log",
                "log_writer",
                "mission_termination",
                "outbound_pulse"
            ]
        );

        assert!(matches!(
            start_workers(&registry, store, &config).await,
            Err(StartError::QueuesTaken)
        ));
        registry.terminate_all().await;
    }
}
