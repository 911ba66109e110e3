//! Render scheduler lifecycle.
//!
//! `RenderScheduler` wires one dispatch queue and one worker pool per
//! enabled renderer kind, then runs the control loop:
//!
//! ```text
//!            ┌──────────── stop token ────────────┐
//!            │                                    ▼
//! StatusBus ─┼─► terminal event ─► release slot   break
//!            │
//! interval ──┴─► reconcile ─► sweep ─► claim waiting ─► DispatchQueue ─► WorkerPool
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assets::{Attributes, GeneratedAsset, SourceAsset};
use crate::config::{RenderAgentConfig, SchedulerSettings};
use crate::error::SchedulerError;
use crate::render::{self, DelegatedResult, Downloader, RenderContext, Uploader};
use crate::storage::AssetStore;
use crate::template::{Template, TemplateCatalog};

use super::admission::{FileTypePolicy, WorkAdmission};
use super::capacity::{ActiveWork, CapacityLedger};
use super::queue::DispatchQueue;
use super::registry::RendererRegistry;
use super::status::{StatusBus, Subscription};
use super::worker_pool::{PoolStats, WorkerPool, WorkerPoolConfig};

/// External collaborators the scheduler is built from.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn AssetStore>,
    pub catalog: Arc<dyn TemplateCatalog>,
    pub downloader: Arc<dyn Downloader>,
    pub uploader: Arc<dyn Uploader>,
}

/// Admission, capacity and worker pools for every configured kind.
pub struct RenderScheduler {
    admission: Arc<WorkAdmission>,
    bus: StatusBus,
    agents: BTreeMap<String, RenderAgentConfig>,
    pools: Mutex<HashMap<String, WorkerPool>>,
    stop_token: CancellationToken,
    control_loop: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl RenderScheduler {
    /// Starts workers for each enabled agent with a registered renderer
    /// and spawns the control loop.
    ///
    /// Agents without a registered renderer get no budget; their work is
    /// persisted as waiting until a node that can render it sweeps.
    pub async fn start(
        deps: SchedulerDeps,
        registry: &RendererRegistry,
        agents: &BTreeMap<String, RenderAgentConfig>,
        settings: &SchedulerSettings,
    ) -> Result<Self, SchedulerError> {
        let bus = StatusBus::new();
        // Subscribe before any worker can publish.
        let events = bus.subscribe(settings.status_buffer);

        let ledger = CapacityLedger::new(settings.burst_multiplier);
        let mut queues = HashMap::new();
        for (kind, agent) in agents.iter().filter(|(_, a)| a.enabled && a.count > 0) {
            if !registry.contains(kind) {
                warn!(kind = %kind, "No renderer registered for enabled agent, skipping");
                continue;
            }
            ledger.configure(kind.clone(), agent.count);
            queues.insert(
                kind.clone(),
                Arc::new(DispatchQueue::new(kind.clone(), settings.queue_capacity)),
            );
        }

        let policy = FileTypePolicy::new(agents, settings);
        let admission = Arc::new(WorkAdmission::new(
            deps.store.clone(),
            deps.catalog,
            deps.uploader,
            ledger,
            queues.clone(),
            policy,
        ));

        let mut pools = HashMap::new();
        for (kind, queue) in &queues {
            let (Some(factory), Some(agent)) = (registry.get(kind), agents.get(kind)) else {
                continue;
            };
            let ctx = RenderContext {
                kind: kind.clone(),
                admission: Arc::clone(&admission),
                downloader: Arc::clone(&deps.downloader),
                params: agent.params.clone(),
            };

            let config = WorkerPoolConfig::new(kind.clone(), agent.count)
                .with_shutdown_timeout(settings.stop_grace());
            let mut pool = WorkerPool::new(config, Arc::clone(queue), deps.store.clone(), bus.clone());
            // A fresh pool is never already running.
            if let Err(e) = pool.start(factory, &ctx) {
                warn!(kind = %kind, error = %e, "Worker pool failed to start");
                continue;
            }
            pools.insert(kind.clone(), pool);
        }

        let stop_token = CancellationToken::new();
        let control_loop = tokio::spawn(control_loop(
            Arc::clone(&admission),
            events,
            stop_token.clone(),
            settings.sweep_interval(),
        ));

        info!(
            kinds = ?admission.ledger().kinds(),
            sweep_interval_secs = settings.sweep_interval_secs,
            "Render scheduler started"
        );

        Ok(Self {
            admission,
            bus,
            agents: agents.clone(),
            pools: Mutex::new(pools),
            stop_token,
            control_loop: Mutex::new(Some(control_loop)),
            stopped: AtomicBool::new(false),
        })
    }

    // ===== Work creation =====

    pub async fn create_work(
        &self,
        source_id: &str,
        url: &str,
        file_type: &str,
        size: u64,
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        self.admission
            .create_work(source_id, url, file_type, size)
            .await
    }

    pub async fn create_work_from_templates(
        &self,
        source_id: &str,
        url: &str,
        attributes: &Attributes,
        template_ids: &[String],
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        self.admission
            .create_work_from_templates(source_id, url, attributes, template_ids)
            .await
    }

    pub async fn create_derived_work(
        &self,
        source: &SourceAsset,
        templates: &[Template],
        first_page: u32,
        last_page: u32,
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        self.admission
            .create_derived_work(source, templates, first_page, last_page)
            .await
    }

    // ===== Introspection and out-of-band control =====

    /// Capacity snapshot for a configured agent kind.
    pub fn active_work_for_render_agent(&self, kind: &str) -> Result<ActiveWork, SchedulerError> {
        if !self.agents.contains_key(kind) {
            return Err(SchedulerError::UnknownRenderAgent(kind.to_string()));
        }
        Ok(self.admission.active_work(kind))
    }

    /// Frees `id`'s slot without a status transition.
    pub fn remove_work(&self, kind: &str, id: &str) -> Result<bool, SchedulerError> {
        if !self.agents.contains_key(kind) {
            return Err(SchedulerError::UnknownRenderAgent(kind.to_string()));
        }
        Ok(self.admission.remove_work(kind, id))
    }

    /// Records the result of a delegated render and frees its slot.
    pub async fn complete_delegated(
        &self,
        id: &str,
        result: DelegatedResult,
    ) -> Result<GeneratedAsset, SchedulerError> {
        render::complete_delegated(&self.admission, id, result).await
    }

    pub async fn pool_stats(&self) -> Vec<PoolStats> {
        let pools = self.pools.lock().await;
        let mut stats: Vec<PoolStats> = pools.values().map(WorkerPool::stats).collect();
        stats.sort_by(|a, b| a.kind.cmp(&b.kind));
        stats
    }

    /// Subscribes to status events from every worker.
    pub fn subscribe(&self, buffer: usize) -> Subscription {
        self.bus.subscribe(buffer)
    }

    pub fn admission(&self) -> &Arc<WorkAdmission> {
        &self.admission
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        self.admission.store()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // ===== Shutdown =====

    /// Stops dispatching, stops the control loop, gives each pool its grace
    /// window and closes every dispatch queue once. Safe to call twice.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Render scheduler already stopped");
            return;
        }
        info!("Stopping render scheduler");

        self.admission.halt();
        self.stop_token.cancel();
        if let Some(handle) = self.control_loop.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Control loop task failed");
            }
        }

        let mut pools = self.pools.lock().await;
        for pool in pools.values_mut() {
            if let Err(e) = pool.shutdown().await {
                warn!(kind = %pool.kind(), error = %e, "Worker pool did not stop cleanly");
            }
        }

        for queue in self.admission.queues() {
            queue.close().await;
        }

        info!("Render scheduler stopped");
    }
}

/// Releases capacity on terminal events. Every tick first frees slots the
/// store already shows as finished, then sweeps.
async fn control_loop(
    admission: Arc<WorkAdmission>,
    mut events: Subscription,
    stop: CancellationToken,
    sweep_interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) if event.status.is_terminal() => {
                    let released = admission.release(&event.kind, &event.id);
                    debug!(
                        kind = %event.kind,
                        id = %event.id,
                        status = %event.status,
                        released = released,
                        "Terminal status received"
                    );
                }
                Some(_) => {}
                None => break,
            },
            _ = ticker.tick() => {
                admission.reconcile().await;
                admission.sweep().await;
            }
        }
    }

    debug!("Control loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetStatus;
    use crate::error::ErrorCode;
    use crate::render::{DefaultDownloader, LocalUploader, Outcome, RenderJob, Renderer};
    use crate::storage::MemoryAssetStore;
    use crate::template::{kinds, StaticTemplateCatalog};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Succeed;

    #[async_trait]
    impl Renderer for Succeed {
        async fn render(&self, _job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
            Ok(Outcome::Complete)
        }
    }

    fn deps(dir: &tempfile::TempDir) -> SchedulerDeps {
        let catalog = Arc::new(StaticTemplateCatalog::with_defaults(Vec::new()).unwrap());
        SchedulerDeps {
            store: Arc::new(MemoryAssetStore::new(catalog.clone())),
            catalog,
            downloader: Arc::new(DefaultDownloader::new(dir.path(), Duration::from_secs(1))),
            uploader: Arc::new(LocalUploader::new(dir.path())),
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            sweep_interval_secs: 1,
            stop_grace_secs: 1,
            ..SchedulerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_start_skips_unregistered_kinds() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry =
            RendererRegistry::new().with(kinds::IMAGE_MAGICK, |_| Arc::new(Succeed) as Arc<dyn Renderer>);
        let scheduler = RenderScheduler::start(
            deps(&dir),
            &registry,
            &RenderAgentConfig::defaults(),
            &settings(),
        )
        .await
        .unwrap();

        let stats = scheduler.pool_stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].kind, kinds::IMAGE_MAGICK);

        let document = scheduler
            .active_work_for_render_agent(kinds::DOCUMENT)
            .unwrap();
        assert!(!document.enabled);
        assert!(matches!(
            scheduler.active_work_for_render_agent("nope"),
            Err(SchedulerError::UnknownRenderAgent(_))
        ));

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(scheduler.is_stopped());
    }

    #[tokio::test]
    async fn test_work_completes_and_releases_capacity() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry =
            RendererRegistry::new().with(kinds::IMAGE_MAGICK, |_| Arc::new(Succeed) as Arc<dyn Renderer>);
        let scheduler = RenderScheduler::start(
            deps(&dir),
            &registry,
            &RenderAgentConfig::defaults(),
            &settings(),
        )
        .await
        .unwrap();

        let created = scheduler
            .create_work("src-1", "local:///a.jpg", "jpg", 10)
            .await
            .unwrap();
        assert_eq!(created.len(), 4);

        let ids: Vec<String> = created.iter().map(|a| a.id.clone()).collect();
        let mut done = false;
        for _ in 0..200 {
            let assets = scheduler.store().find_generated_by_ids(&ids).await.unwrap();
            let active = scheduler
                .active_work_for_render_agent(kinds::IMAGE_MAGICK)
                .unwrap();
            if assets.iter().all(|a| a.status == AssetStatus::Complete) && active.active_ids.is_empty() {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_work_after_stop_waits() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry =
            RendererRegistry::new().with(kinds::IMAGE_MAGICK, |_| Arc::new(Succeed) as Arc<dyn Renderer>);
        let scheduler = RenderScheduler::start(
            deps(&dir),
            &registry,
            &RenderAgentConfig::defaults(),
            &settings(),
        )
        .await
        .unwrap();
        scheduler.stop().await;

        let created = scheduler
            .create_work("src-1", "local:///a.jpg", "jpg", 10)
            .await
            .unwrap();
        assert!(created.iter().all(|a| a.status == AssetStatus::Waiting));
    }
}
