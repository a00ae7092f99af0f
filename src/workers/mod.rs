//! Worker pool management for the model hub.
//!
//! This module owns the fleet of model-inference worker processes: their
//! launch, readiness tracking, per-model availability pools, crash recovery
//! and dispatch concurrency.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Incoming /predict                     │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ acquire(model) / release(id)
//!                    ┌────────▼────────┐
//!                    │  WorkerManager  │ ← failure loop, readiness
//!                    └────────┬────────┘
//!                             │
//!                ┌────────────┼────────────┐
//!         ┌──────▼──────┐            ┌─────▼───────┐
//!         │ Pool: llama │            │ Pool: bert  │  ← ready idle FIFO
//!         └──────┬──────┘            └─────┬───────┘
//!                │                         │
//!        ┌───────▼───────┐         ┌───────▼───────┐
//!        │ llama-1 :7778 │   ...   │ bert-1  :7780 │  ← child processes
//!        │ llama-2 :7779 │         └───────────────┘
//!        └───────────────┘
//! ```
//!
//! A worker sits in its model's pool exactly while it is ready and idle.
//! Dispatch takes it out (making it busy), release puts it back, and the
//! failure loop evicts it when its process exits, relaunching after a
//! cool-down.

mod manager;
mod pool;
mod telemetry;
mod worker;

pub use manager::WorkerManager;
pub use pool::AvailabilityPool;
pub use worker::{Worker, WorkerFailure, WorkerId};
