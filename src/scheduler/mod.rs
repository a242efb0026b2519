//! Concurrent task dispatch with bounded parallelism.
//!
//! This module provides the acquisition side of a run:
//!
//! - **TaskQueue**: in-process FIFO backlog shared by the workers
//! - **WorkerPool**: fixed set of workers that execute tasks concurrently
//! - **RetryPolicy**: exponential backoff shared with the downstream stages
//! - **CancelSignal**: run-level cancellation
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ Orchestrator │
//!                      │  (sources)   │
//!                      └──────┬───────┘
//!                             │ submit
//!                      ┌──────▼───────┐      backoff
//!                      │  TaskQueue   │◄─────────────┐
//!                      └──────┬───────┘              │
//!         ┌───────────────────┼───────────────────┐  │
//!         ▼                   ▼                   ▼  │
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│──► SmartRouter
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └───────────────────┼───────────────────┘
//!                             ▼
//!                    results() stream of TaskOutcome
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use lead_sniper::scheduler::{CancelSignal, Task, WorkerPool, WorkerPoolConfig};
//! use futures::StreamExt;
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(10), router, venues, CancelSignal::new());
//! let mut results = pool.results()?;
//! pool.start()?;
//! pool.submit(Task::new("county", "https://records.example/123"))?;
//! pool.close();
//!
//! while let Some(outcome) = results.next().await {
//!     println!("{} -> {:?}", outcome.task.id, outcome.result.is_ok());
//! }
//! ```

pub mod backoff;
pub mod cancel;
pub mod queue;
pub mod task;
pub mod worker_pool;

// Re-export main types for convenience
pub use backoff::{RetryExhausted, RetryPolicy};
pub use cancel::CancelSignal;
pub use queue::{QueueError, TaskQueue};
pub use task::{SourceSpec, Task, TaskStatus};
pub use worker_pool::{PoolError, PoolStats, TaskOutcome, WorkerPool, WorkerPoolConfig};
