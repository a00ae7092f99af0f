//! Application state shared across all handlers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::workers::WorkerManager;

pub struct AppState {
    /// Worker fleet owner; `acquire`/`release` live here.
    pub manager: WorkerManager,

    /// Dispatch counters.
    pub stats: DispatchStats,
}

impl AppState {
    pub fn new(manager: WorkerManager) -> Self {
        Self { manager, stats: DispatchStats::default() }
    }
}

/// Counters for the dispatch path.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_failed: AtomicU64,
}

impl DispatchStats {
    pub fn record_received(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the dispatch counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
}
