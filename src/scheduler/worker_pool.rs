//! Worker pool for one renderer kind.
//!
//! Each worker runs as an independent async task that pulls ids from the
//! kind's dispatch queue and renders them one at a time.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel and a bounded grace window
//! - Panic isolation: a panicking renderer fails its asset, not the worker
//! - Pool statistics tracking

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::assets::AssetStatus;
use crate::error::ErrorCode;
use crate::metrics::MetricsCollector;
use crate::render::{Outcome, RenderContext, RenderJob, Renderer};
use crate::storage::AssetStore;

use super::queue::{DispatchQueue, QueueReceiver};
use super::registry::RendererFactory;
use super::session::CommitSession;
use super::status::{StatusBus, StatusEvent};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Some workers were still rendering when the grace window ran out.
    #[error("Shutdown timed out after {timeout:?} with {outstanding} worker(s) still rendering")]
    ShutdownTimeout {
        timeout: Duration,
        outstanding: usize,
    },
}

/// Configuration for one kind's worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Renderer kind served by this pool.
    pub kind: String,
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Grace window for workers to finish their current render on shutdown.
    pub shutdown_timeout: Duration,
}

impl WorkerPoolConfig {
    pub fn new(kind: impl Into<String>, num_workers: usize) -> Self {
        Self {
            kind: kind.into(),
            num_workers,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PoolStats {
    pub kind: String,
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently rendering.
    pub active_workers: usize,
    /// Renders that ended `complete` or `delegated`.
    pub renders_completed: u64,
    /// Renders that ended `failed:*`.
    pub renders_failed: u64,
    /// Average render duration.
    pub average_render_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of renders processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.renders_completed + self.renders_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.renders_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    renders_completed: AtomicU64,
    renders_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            renders_completed: AtomicU64::new(0),
            renders_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.renders_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.renders_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, kind: &str, num_workers: usize) -> PoolStats {
        let completed = self.renders_completed.load(Ordering::SeqCst);
        let failed = self.renders_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = completed + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            kind: kind.to_string(),
            num_workers,
            active_workers: active as usize,
            renders_completed: completed,
            renders_failed: failed,
            average_render_duration: average_duration,
        }
    }
}

/// Pool of workers rendering one kind's dispatched ids.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<DispatchQueue>,
    store: Arc<dyn AssetStore>,
    bus: StatusBus,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool reading from `queue`. Workers persist through `store`
    /// and publish terminal statuses on `bus`.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<DispatchQueue>,
        store: Arc<dyn AssetStore>,
        bus: StatusBus,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            store,
            bus,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers, building one renderer per worker.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self, factory: &RendererFactory, ctx: &RenderContext) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("{}-{}", self.config.kind, i),
                kind: self.config.kind.clone(),
                renderer: factory(ctx),
                queue: self.queue.receiver(),
                store: Arc::clone(&self.store),
                bus: self.bus.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
                stats: Arc::clone(&self.stats),
                metrics: MetricsCollector::new(),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            kind = %self.config.kind,
            num_workers = self.config.num_workers,
            "Worker pool started"
        );

        Ok(())
    }

    /// Asks every worker to stop and waits for current renders to finish.
    ///
    /// In-flight renders are never cancelled. Workers still rendering when
    /// the grace window ends are left running detached.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` with the exact number of workers
    /// still rendering when the window ran out.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!(kind = %self.config.kind, "Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let mut outstanding = 0;
        for mut handle in self.worker_handles.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(kind = %self.config.kind, error = %e, "Worker task panicked"),
                Err(_) => outstanding += 1,
            }
        }

        if outstanding > 0 {
            warn!(
                kind = %self.config.kind,
                outstanding = outstanding,
                "Workers still rendering after shutdown grace window"
            );
            return Err(PoolError::ShutdownTimeout {
                timeout: self.config.shutdown_timeout,
                outstanding,
            });
        }

        info!(kind = %self.config.kind, "Worker pool shutdown complete");
        Ok(())
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats
            .to_pool_stats(&self.config.kind, self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn kind(&self) -> &str {
        &self.config.kind
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker rendering ids from its kind's queue.
struct Worker {
    id: String,
    kind: String,
    renderer: Arc<dyn Renderer>,
    queue: QueueReceiver,
    store: Arc<dyn AssetStore>,
    bus: StatusBus,
    shutdown_rx: broadcast::Receiver<()>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop. A render in progress always finishes before the
    /// shutdown signal is observed.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                next = self.queue.next() => match next {
                    Some(id) => self.render(id).await,
                    None => {
                        debug!(worker_id = %self.id, "Dispatch queue closed");
                        break;
                    }
                },
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Renders one id under a commit session.
    async fn render(&self, id: String) {
        let start_time = Instant::now();

        let asset = match self.store.find_generated_by_id(&id).await {
            Ok(asset) => asset,
            Err(e) => {
                warn!(worker_id = %self.id, id = %id, error = %e, "Could not load dispatched asset");
                // Nothing to persist, but the slot must still be released.
                let status = AssetStatus::Failed(ErrorCode::UnknownError);
                self.bus
                    .publish(StatusEvent::new(id, status, self.kind.clone()))
                    .await;
                return;
            }
        };

        debug!(worker_id = %self.id, id = %id, template_id = %asset.template_id, "Rendering");
        self.stats.increment_active();

        let mut session = CommitSession::begin(
            asset.clone(),
            self.kind.clone(),
            Arc::clone(&self.store),
            self.bus.clone(),
        )
        .await;

        let mut job = RenderJob::new(asset);
        let outcome = AssertUnwindSafe(self.renderer.render(&mut job))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(Outcome::Complete)) => session.complete(&job.attributes),
            Ok(Ok(Outcome::Delegated)) => session.delegate(&job.attributes),
            Ok(Err(code)) => session.fail(code, &job.attributes),
            Err(_) => {
                error!(worker_id = %self.id, id = %id, "Renderer panicked");
            }
        }

        let status = session.close().await;
        let duration = start_time.elapsed();
        self.stats.decrement_active();

        if matches!(status, AssetStatus::Failed(_)) {
            self.stats.record_failure(duration);
            warn!(
                worker_id = %self.id,
                id = %id,
                status = %status,
                duration_ms = duration.as_millis(),
                "Render failed"
            );
        } else {
            self.stats.record_completion(duration);
            info!(
                worker_id = %self.id,
                id = %id,
                status = %status,
                duration_ms = duration.as_millis(),
                "Render finished"
            );
        }
        self.metrics
            .record_render(&self.kind, status.label(), duration.as_secs_f64());
    }
}
