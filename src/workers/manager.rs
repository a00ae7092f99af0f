//! Worker manager: owns every worker, routes lifecycle events, and serves
//! `acquire`/`release` to the ingress layer.
//!
//! The worker map and pool map are built once at construction and never
//! mutated; only pool contents and per-worker flags change afterwards.
//! Together with the per-worker lock that is the whole locking story: there
//! is no manager-wide lock on the dispatch path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{HubConfig, ModelName};
use crate::error::HubError;

use super::pool::AvailabilityPool;
use super::telemetry;
use super::worker::{format_elapsed, Worker, WorkerFailure, WorkerId};

/// Cheaply clonable handle to the worker fleet.
#[derive(Clone)]
pub struct WorkerManager {
    inner: Arc<Inner>,
}

struct Inner {
    workers: HashMap<WorkerId, Arc<Worker>>,
    pools: HashMap<ModelName, AvailabilityPool>,
    model_names: Vec<ModelName>,
    failed_tx: mpsc::UnboundedSender<WorkerFailure>,
    failed_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerFailure>>>,
    restart_cooldown: Duration,
}

impl WorkerManager {
    /// Build the worker set and one availability pool per model.
    ///
    /// Ports are assigned sequentially from `base_port`, ascending across
    /// all (model, ordinal) pairs in configuration order, and never change
    /// afterwards.
    pub fn new(config: &HubConfig) -> Self {
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        let client = reqwest::Client::builder()
            .timeout(config.forward_timeout())
            .build()
            .expect("failed to create HTTP client");

        let mut workers = HashMap::new();
        let mut pools = HashMap::new();
        let mut model_names = Vec::with_capacity(config.models.len());
        let mut next_port = config.base_port;

        for model in &config.models {
            model_names.push(model.name.clone());
            pools.insert(model.name.clone(), AvailabilityPool::new(model.workers));
            for ordinal in 1..=model.workers {
                let id = WorkerId::new(&model.name, ordinal);
                let worker = Arc::new(Worker::new(
                    id.clone(),
                    model.clone(),
                    next_port,
                    config.worker_command.clone(),
                    failed_tx.clone(),
                    client.clone(),
                ));
                workers.insert(id, worker);
                next_port += 1;
            }
        }

        Self {
            inner: Arc::new(Inner {
                workers,
                pools,
                model_names,
                failed_tx,
                failed_rx: Mutex::new(Some(failed_rx)),
                restart_cooldown: config.restart_cooldown(),
            }),
        }
    }

    /// Start the failure loop, the telemetry loop, and every worker.
    ///
    /// Returns as soon as the children are spawned; `acquire` blocks until
    /// the matching workers signal ready. A spawn failure here is fatal.
    pub fn initialize(&self) -> Result<(), HubError> {
        let Some(failed_rx) = self
            .inner
            .failed_rx
            .lock()
            .expect("manager mutex poisoned")
            .take()
        else {
            warn!("manager already initialized");
            return Ok(());
        };

        tokio::spawn(run_failure_loop(self.clone(), failed_rx));
        tokio::spawn(telemetry::run(self.clone()));

        info!(workers = self.inner.workers.len(), "starting workers");
        for worker in self.inner.workers.values() {
            worker.start()?;
        }
        Ok(())
    }

    /// Reserve a ready, idle worker for the given model.
    ///
    /// Blocks until one is available; the caller must `release` it exactly
    /// once. Dropping the future while waiting abandons the wait cleanly.
    pub async fn acquire(&self, model: &ModelName) -> Result<Arc<Worker>, HubError> {
        let pool = self
            .inner
            .pools
            .get(model)
            .ok_or_else(|| HubError::UnknownModel(model.clone()))?;
        let worker = pool.take().await;
        worker.mark_busy();
        debug!(worker_id = %worker.id(), model = %model, "worker acquired");
        Ok(worker)
    }

    /// Return a worker to its pool after a dispatch.
    ///
    /// If the worker's child has exited in the meantime, this does nothing;
    /// the restart path re-offers it after the next readiness callback.
    /// Unknown ids are ignored.
    pub fn release(&self, id: &WorkerId) {
        let Some(worker) = self.inner.workers.get(id) else {
            return;
        };
        if !worker.is_launched() || !worker.is_loaded() {
            debug!(worker_id = %id, "released worker has no live process, not re-queued");
            return;
        }
        worker.mark_available();
        if let Some(pool) = self.inner.pools.get(worker.model_name()) {
            pool.offer(Arc::clone(worker));
        }
    }

    /// Handle the readiness callback from a worker child.
    ///
    /// Unknown ids are ignored; a duplicate callback within one generation
    /// is harmless because the pool refuses duplicate entries.
    pub fn mark_worker_ready(&self, id: &WorkerId) {
        let Some(worker) = self.inner.workers.get(id) else {
            debug!(worker_id = %id, "readiness callback for unknown worker ignored");
            return;
        };
        worker.mark_ready();
        if worker.is_loaded() && !worker.is_busy() {
            if let Some(pool) = self.inner.pools.get(worker.model_name()) {
                pool.offer(Arc::clone(worker));
            }
            info!(worker_id = %id, model = %worker.model_name(), "worker ready");
        }
    }

    /// True iff every configured model has at least one loaded worker.
    pub fn is_ready(&self) -> bool {
        self.inner.model_names.iter().all(|name| {
            self.inner
                .workers
                .values()
                .any(|w| w.model_name() == name && w.is_loaded())
        })
    }

    pub fn worker(&self, id: &WorkerId) -> Option<&Arc<Worker>> {
        self.inner.workers.get(id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.inner.workers.values()
    }

    /// Current pool depth per model, in configuration order.
    pub fn pool_depths(&self) -> Vec<(ModelName, usize)> {
        self.inner
            .model_names
            .iter()
            .map(|name| {
                let depth = self.inner.pools.get(name).map(|p| p.len()).unwrap_or(0);
                (name.clone(), depth)
            })
            .collect()
    }

    pub(crate) fn requeue_failure(&self, failure: WorkerFailure) {
        let _ = self.inner.failed_tx.send(failure);
    }
}

/// Consume the failure channel and restart exited workers, one at a time.
///
/// For each failed id: mark the worker exited, evict it from its pool, wait
/// the cool-down, relaunch. Failures arriving meanwhile queue up on the
/// channel. A respawn failure is re-queued so the next round retries it.
async fn run_failure_loop(
    manager: WorkerManager,
    mut failed_rx: mpsc::UnboundedReceiver<WorkerFailure>,
) {
    while let Some(failure) = failed_rx.recv().await {
        let Some(worker) = manager.inner.workers.get(&failure.id) else {
            continue;
        };
        worker.mark_exited();
        if let Some(pool) = manager.inner.pools.get(worker.model_name()) {
            pool.remove(worker.id());
        }

        info!(
            worker_id = %failure.id,
            cooldown = %format_elapsed(manager.inner.restart_cooldown),
            "waiting before restart"
        );
        tokio::time::sleep(manager.inner.restart_cooldown).await;

        if let Err(e) = worker.start() {
            error!(worker_id = %failure.id, error = %e, "respawn failed, retrying after cool-down");
            manager.requeue_failure(WorkerFailure {
                id: failure.id,
                description: format!("respawn failed: {}", e),
                runtime: Duration::ZERO,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use tokio::time::timeout;

    fn config_with(models: Vec<(&str, usize)>, command: &[&str], base_port: u16) -> HubConfig {
        HubConfig {
            models: models
                .into_iter()
                .map(|(name, workers)| ModelConfig {
                    name: ModelName::new(name),
                    path: format!("/models/{}", name),
                    handler: "h".into(),
                    workers,
                })
                .collect(),
            worker_command: command.iter().map(|s| s.to_string()).collect(),
            base_port,
            restart_cooldown_secs: 1,
            forward_timeout_secs: 30,
        }
    }

    // `sh -c` ignores the worker argv tail (it lands in $0 and the
    // positional parameters), which makes it a convenient stand-in binary.
    const SLEEPER: &[&str] = &["sh", "-c", "sleep 5"];

    #[test]
    fn test_construction_assigns_sequential_ports() {
        let config = config_with(vec![("a", 2), ("b", 1)], SLEEPER, 7778);
        let manager = WorkerManager::new(&config);

        let a1 = manager.worker(&WorkerId::new(&ModelName::new("a"), 1)).unwrap();
        let a2 = manager.worker(&WorkerId::new(&ModelName::new("a"), 2)).unwrap();
        let b1 = manager.worker(&WorkerId::new(&ModelName::new("b"), 1)).unwrap();
        assert_eq!(a1.port(), 7778);
        assert_eq!(a2.port(), 7779);
        assert_eq!(b1.port(), 7780);

        assert_eq!(
            manager.pool_depths(),
            vec![(ModelName::new("a"), 0), (ModelName::new("b"), 0)]
        );
    }

    #[tokio::test]
    async fn test_acquire_unknown_model() {
        let config = config_with(vec![("a", 1)], SLEEPER, 18910);
        let manager = WorkerManager::new(&config);
        let err = manager.acquire(&ModelName::new("nope")).await.unwrap_err();
        assert!(matches!(err, HubError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn test_readiness_and_acquire_release_cycle() {
        let config = config_with(vec![("a", 1)], SLEEPER, 18920);
        let manager = WorkerManager::new(&config);
        manager.initialize().unwrap();

        let id = WorkerId::new(&ModelName::new("a"), 1);
        assert!(!manager.is_ready());

        // Unknown readiness callbacks are ignored.
        manager.mark_worker_ready(&WorkerId::new(&ModelName::new("ghost"), 1));

        manager.mark_worker_ready(&id);
        assert!(manager.is_ready());
        assert_eq!(manager.pool_depths()[0].1, 1);

        let worker = manager.acquire(&ModelName::new("a")).await.unwrap();
        assert!(worker.is_busy());
        assert_eq!(manager.pool_depths()[0].1, 0);

        manager.release(&id);
        assert!(!worker.is_busy());
        assert_eq!(manager.pool_depths()[0].1, 1);

        // A duplicate readiness callback must not duplicate the entry.
        manager.mark_worker_ready(&id);
        assert_eq!(manager.pool_depths()[0].1, 1);
    }

    #[tokio::test]
    async fn test_release_of_exited_worker_is_ignored() {
        let config = config_with(vec![("a", 1)], SLEEPER, 18930);
        let manager = WorkerManager::new(&config);
        manager.initialize().unwrap();

        let id = WorkerId::new(&ModelName::new("a"), 1);
        manager.mark_worker_ready(&id);
        let worker = manager.acquire(&ModelName::new("a")).await.unwrap();

        worker.mark_exited();
        manager.release(&id);
        assert_eq!(manager.pool_depths()[0].1, 0);

        // Releasing an unknown id is also a no-op.
        manager.release(&WorkerId::new(&ModelName::new("ghost"), 1));
    }

    #[tokio::test]
    async fn test_crash_triggers_cooldown_restart_on_same_port() {
        // The child exits immediately; the failure loop must relaunch it
        // after the 1 s cool-down, on the same port.
        let config = config_with(vec![("a", 1)], &["sh", "-c", "exit 1"], 18940);
        let manager = WorkerManager::new(&config);
        manager.initialize().unwrap();

        let id = WorkerId::new(&ModelName::new("a"), 1);
        let worker = Arc::clone(manager.worker(&id).unwrap());
        let port = worker.port();

        let relaunched = async {
            while worker.generation() < 2 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        timeout(Duration::from_secs(5), relaunched)
            .await
            .expect("worker was not relaunched");
        assert_eq!(worker.port(), port);
    }

    #[tokio::test]
    async fn test_failed_worker_is_evicted_from_pool() {
        let config = config_with(vec![("a", 1)], SLEEPER, 18950);
        let manager = WorkerManager::new(&config);
        manager.initialize().unwrap();

        let id = WorkerId::new(&ModelName::new("a"), 1);
        manager.mark_worker_ready(&id);
        assert_eq!(manager.pool_depths()[0].1, 1);

        // Simulate an observed exit.
        manager.requeue_failure(WorkerFailure {
            id: id.clone(),
            description: "process exited with signal: 9".into(),
            runtime: Duration::from_secs(1),
        });

        let evicted = async {
            while manager.pool_depths()[0].1 > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(Duration::from_secs(2), evicted)
            .await
            .expect("failed worker was not evicted");
        assert!(!manager.is_ready());
    }
}
