//! Per-model availability pool.
//!
//! Holds the workers of one model that are ready and idle. The pool is the
//! only synchronization point between the dispatch path (which takes
//! workers) and the lifecycle paths (which offer workers back on readiness
//! and release, and remove them on failure).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::warn;

use super::worker::{Worker, WorkerId};

/// FIFO queue of ready, idle workers for one model.
///
/// A semaphore permit exists for every queued entry. `take` acquires a
/// permit before popping, so waiters are served in arrival order (tokio's
/// semaphore queues waiters fairly) and an abandoned wait consumes nothing.
/// `remove` reconciles the permit count; the brief window where a permit
/// outlives its entry is absorbed by the retry loop in `take`.
pub struct AvailabilityPool {
    entries: Mutex<VecDeque<Arc<Worker>>>,
    available: Semaphore,
    capacity: usize,
}

impl AvailabilityPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            capacity,
        }
    }

    /// Queue a worker as available. Duplicate offers are ignored.
    pub fn offer(&self, worker: Arc<Worker>) {
        let mut entries = self.entries.lock().expect("pool mutex poisoned");
        if entries.iter().any(|w| w.id() == worker.id()) {
            return;
        }
        if entries.len() >= self.capacity {
            // Capacity equals the model's worker count, so this cannot
            // happen while the membership invariant holds.
            warn!(worker_id = %worker.id(), "pool at capacity, dropping offer");
            return;
        }
        entries.push_back(worker);
        drop(entries);
        self.available.add_permits(1);
    }

    /// Wait until a worker is available and reserve it.
    ///
    /// Entries whose process exited between offer and take are skipped, so
    /// an exited worker is never handed out. Cancellation while waiting has
    /// no side effects: the permit is only consumed together with the queue
    /// entry.
    pub async fn take(&self) -> Arc<Worker> {
        loop {
            let permit = self
                .available
                .acquire()
                .await
                .expect("pool semaphore never closed");
            permit.forget();
            let worker = {
                let mut entries = self.entries.lock().expect("pool mutex poisoned");
                entries.pop_front()
            };
            match worker {
                Some(worker) if worker.is_launched() && worker.is_loaded() => return worker,
                Some(worker) => {
                    warn!(worker_id = %worker.id(), "skipping pool entry with no live process");
                }
                // The entry this permit covered was removed concurrently;
                // wait for the next offer.
                None => {}
            }
        }
    }

    /// Remove the entry with the given id, keeping the order of the rest.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, id: &WorkerId) -> bool {
        let mut entries = self.entries.lock().expect("pool mutex poisoned");
        let Some(pos) = entries.iter().position(|w| w.id() == id) else {
            return false;
        };
        entries.remove(pos);
        drop(entries);
        if let Ok(permit) = self.available.try_acquire() {
            permit.forget();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
