//! Render work scheduling with per-kind worker pools.
//!
//! This module owns the lifecycle of a generated asset from admission to
//! its terminal status:
//!
//! - **WorkAdmission**: creates work and decides `scheduled` vs `waiting`
//! - **CapacityLedger**: per-kind active sets bounded by `workers * 4`
//! - **DispatchQueue**: bounded per-kind queue whose close waits for in-flight sends
//! - **WorkerPool**: workers rendering one id at a time under a commit session
//! - **StatusBus**: terminal status fan-out with scoped subscriptions
//!
//! # Architecture
//!
//! ```text
//!   create_work ──► WorkAdmission ──► AssetStore (scheduled | waiting)
//!                        │  ▲
//!              enqueue   │  │ sweep: claim waiting
//!                        ▼  │
//!                 ┌───────────────┐
//!                 │ DispatchQueue │  (one per kind)
//!                 └───────┬───────┘
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!    ┌─────────┐     ┌─────────┐     ┌─────────┐
//!    │ Worker 1│     │ Worker 2│     │ Worker N│
//!    └────┬────┘     └────┬────┘     └────┬────┘
//!         └──── CommitSession::close ─────┘
//!                         │
//!                    StatusBus ──► control loop ──► release slot
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use preview::render::builtin_registry;
//! use preview::scheduler::{RenderScheduler, SchedulerDeps};
//!
//! let scheduler = RenderScheduler::start(deps, &builtin_registry(), &agents, &settings).await?;
//! scheduler.create_work("src-1", "http://files/report.docx", "docx", 1024).await?;
//!
//! // Graceful shutdown
//! scheduler.stop().await;
//! ```

pub mod admission;
pub mod capacity;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod session;
pub mod status;
pub mod worker_pool;

// Re-export main types for convenience
pub use admission::{FileTypePolicy, WorkAdmission};
pub use capacity::{ActiveWork, CapacityLedger, DEFAULT_BURST_MULTIPLIER};
pub use manager::{RenderScheduler, SchedulerDeps};
pub use queue::{DispatchQueue, PendingDispatch, QueueReceiver, DEFAULT_QUEUE_CAPACITY};
pub use registry::{RendererFactory, RendererRegistry};
pub use session::CommitSession;
pub use status::{StatusBus, StatusEvent, Subscription};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
