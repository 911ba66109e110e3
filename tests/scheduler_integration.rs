//! End-to-end tests for the render scheduler.
//!
//! Every test runs a real `RenderScheduler` against the in-memory store with
//! fake renderers registered in place of the external tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use preview::assets::{AssetStatus, GeneratedAsset, SourceAsset};
use preview::config::{RenderAgentConfig, SchedulerSettings};
use preview::render::{
    complete_delegated, DefaultDownloader, DelegatedResult, LocalUploader, Outcome, RenderJob,
    Renderer,
};
use preview::scheduler::{
    CapacityLedger, FileTypePolicy, RenderScheduler, RendererRegistry, SchedulerDeps,
    WorkAdmission,
};
use preview::storage::MemoryAssetStore;
use preview::template::{kinds, StaticTemplateCatalog, TemplateCatalog, LEGACY_TEMPLATE_IDS};
use preview::ErrorCode;

// ===== Fake renderers =====

struct Succeed;

#[async_trait]
impl Renderer for Succeed {
    async fn render(&self, job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        job.record("rendered", "true");
        Ok(Outcome::Complete)
    }
}

struct FailWith(ErrorCode);

#[async_trait]
impl Renderer for FailWith {
    async fn render(&self, _job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        Err(self.0.clone())
    }
}

/// Sleeps before succeeding and records the highest concurrency it saw.
struct Slow {
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for Slow {
    async fn render(&self, _job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Outcome::Complete)
    }
}

/// Hands the asset to an external service.
struct Delegate;

#[async_trait]
impl Renderer for Delegate {
    async fn render(&self, job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        job.record("streamingUrl", "http://cdn/pending.m3u8");
        Ok(Outcome::Delegated)
    }
}

/// Never finishes on its own.
struct Stuck {
    started: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for Stuck {
    async fn render(&self, _job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        self.started.fetch_add(1, Ordering::SeqCst);
        futures::future::pending::<()>().await;
        Ok(Outcome::Complete)
    }
}

// ===== Harness =====

struct Harness {
    scheduler: RenderScheduler,
    catalog: Arc<StaticTemplateCatalog>,
    dir: tempfile::TempDir,
}

fn agents(kind: &str, count: usize) -> BTreeMap<String, RenderAgentConfig> {
    let mut agents = RenderAgentConfig::defaults();
    if let Some(agent) = agents.get_mut(kind) {
        agent.count = count;
    }
    agents
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        sweep_interval_secs: 1,
        stop_grace_secs: 1,
        ..SchedulerSettings::default()
    }
}

async fn start<R>(workers: usize, make: impl Fn() -> R + Send + Sync + 'static) -> Harness
where
    R: Renderer + 'static,
{
    start_kind(kinds::IMAGE_MAGICK, workers, make).await
}

async fn start_kind<R>(
    kind: &str,
    workers: usize,
    make: impl Fn() -> R + Send + Sync + 'static,
) -> Harness
where
    R: Renderer + 'static,
{
    let dir = tempfile::TempDir::new().unwrap();
    let catalog = Arc::new(StaticTemplateCatalog::with_defaults(Vec::new()).unwrap());
    let deps = SchedulerDeps {
        store: Arc::new(MemoryAssetStore::new(catalog.clone())),
        catalog: catalog.clone(),
        downloader: Arc::new(DefaultDownloader::new(dir.path(), Duration::from_secs(1))),
        uploader: Arc::new(LocalUploader::new(dir.path())),
    };
    let registry = RendererRegistry::new()
        .with(kind, move |_| Arc::new(make()) as Arc<dyn Renderer>);

    let scheduler = RenderScheduler::start(deps, &registry, &agents(kind, workers), &settings())
        .await
        .unwrap();

    Harness {
        scheduler,
        catalog,
        dir,
    }
}

fn ids(assets: &[GeneratedAsset]) -> Vec<String> {
    assets.iter().map(|a| a.id.clone()).collect()
}

/// Polls until every asset is terminal and the image kind holds no slots.
async fn wait_for_drain(scheduler: &RenderScheduler, ids: &[String]) -> Vec<GeneratedAsset> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let assets = scheduler.store().find_generated_by_ids(ids).await.unwrap();
        let active = scheduler
            .active_work_for_render_agent(kinds::IMAGE_MAGICK)
            .unwrap();
        if assets.iter().all(|a| a.status.is_terminal()) && active.active_ids.is_empty() {
            return assets;
        }
        assert!(
            Instant::now() < deadline,
            "work did not drain: {:?}",
            assets.iter().map(|a| a.status.to_string()).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ===== Tests =====

#[tokio::test]
async fn test_succeeding_renderer_completes_all_templates() {
    let harness = start(2, || Succeed).await;
    let scheduler = &harness.scheduler;

    let created = scheduler
        .create_work("src-1", "local:///input.jpg", "jpg", 2048)
        .await
        .unwrap();
    assert_eq!(created.len(), LEGACY_TEMPLATE_IDS.len());

    let assets = wait_for_drain(scheduler, &ids(&created)).await;
    for asset in &assets {
        assert_eq!(asset.status, AssetStatus::Complete);
        assert_eq!(asset.attributes.first("rendered"), Some("true"));
    }

    let stats = scheduler.pool_stats().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].renders_completed, 4);
    assert_eq!(stats[0].renders_failed, 0);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_failing_renderer_records_code_and_releases() {
    let code = ErrorCode::CouldNotResizeImage;
    let harness = start(1, move || FailWith(code.clone())).await;
    let scheduler = &harness.scheduler;

    let created = scheduler
        .create_work("src-1", "local:///input.png", "png", 2048)
        .await
        .unwrap();

    let assets = wait_for_drain(scheduler, &ids(&created)).await;
    for asset in &assets {
        assert_eq!(
            asset.status,
            AssetStatus::failed(ErrorCode::CouldNotResizeImage)
        );
        assert_eq!(asset.status.to_string(), "failed:could-not-resize-image");
    }

    let stats = scheduler.pool_stats().await;
    assert_eq!(stats[0].renders_failed, 4);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_active_set_never_exceeds_burst_budget() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());
    let harness = start(1, move || Slow {
        delay: Duration::from_millis(15),
        running: r.clone(),
        peak: p.clone(),
    })
    .await;
    let scheduler = &harness.scheduler;

    let mut created = Vec::new();
    for n in 0..5 {
        created.extend(
            scheduler
                .create_work(&format!("src-{n}"), "local:///input.gif", "gif", 10)
                .await
                .unwrap(),
        );
    }
    assert_eq!(created.len(), 20);
    assert!(created.iter().any(|a| a.status == AssetStatus::Waiting));

    let all = ids(&created);
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let active = scheduler
            .active_work_for_render_agent(kinds::IMAGE_MAGICK)
            .unwrap();
        assert!(active.active_ids.len() <= 4, "{} active", active.active_ids.len());

        let assets = scheduler.store().find_generated_by_ids(&all).await.unwrap();
        if assets.iter().all(|a| a.status == AssetStatus::Complete) && active.active_ids.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "sweep did not drain waiting work");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_derived_work_covers_page_range() {
    let harness = start(1, || Succeed).await;
    let scheduler = &harness.scheduler;

    let template_ids: Vec<String> = LEGACY_TEMPLATE_IDS[..2]
        .iter()
        .map(|id| id.to_string())
        .collect();
    let templates = harness.catalog.find_by_ids(&template_ids).await.unwrap();
    let mut source = SourceAsset::new("src-9", "pdf");
    source.attributes.set("type", "pdf");

    let created = scheduler
        .create_derived_work(&source, &templates, 1, 12)
        .await
        .unwrap();
    assert_eq!(created.len(), 11 * templates.len());

    let mut pages: Vec<u32> = created
        .iter()
        .map(|a| a.attributes.first("page").unwrap().parse().unwrap())
        .collect();
    pages.sort_unstable();
    pages.dedup();
    assert_eq!(pages, (1..12).collect::<Vec<u32>>());
    assert!(created
        .iter()
        .all(|a| matches!(a.status, AssetStatus::Waiting | AssetStatus::Scheduled)));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_stop_with_stuck_workers_returns_after_grace() {
    let started = Arc::new(AtomicUsize::new(0));
    let s = started.clone();
    let harness = start(2, move || Stuck { started: s.clone() }).await;
    let scheduler = &harness.scheduler;

    scheduler
        .create_work("src-1", "local:///input.jpg", "jpg", 10)
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while started.load(Ordering::SeqCst) < 2 {
        assert!(Instant::now() < deadline, "workers never picked up work");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let began = Instant::now();
    scheduler.stop().await;
    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(scheduler.is_stopped());

    // A second stop must not close the queues again.
    scheduler.stop().await;
}

#[tokio::test]
async fn test_delegated_completion_in_another_process_frees_slot() {
    let harness = start_kind(kinds::VIDEO, 1, || Delegate).await;
    let scheduler = &harness.scheduler;

    let created = scheduler
        .create_work("src-v", "local:///clip.mp4", "mp4", 10)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    let id = created[0].id.clone();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let asset = scheduler.store().find_generated_by_id(&id).await.unwrap();
        if asset.status == AssetStatus::Delegated {
            break;
        }
        assert!(Instant::now() < deadline, "asset never delegated: {}", asset.status);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let active = scheduler.active_work_for_render_agent(kinds::VIDEO).unwrap();
    assert_eq!(active.active_ids, vec![id.clone()]);

    // The callback runs with its own admission and an empty ledger, sharing
    // only the store with the serving node.
    let callback = WorkAdmission::new(
        Arc::clone(scheduler.store()),
        harness.catalog.clone(),
        Arc::new(LocalUploader::new(harness.dir.path())),
        CapacityLedger::new(4),
        HashMap::new(),
        FileTypePolicy::new(&RenderAgentConfig::defaults(), &settings()),
    );
    let completed = complete_delegated(
        &callback,
        &id,
        DelegatedResult::Succeeded {
            streaming_url: Some("http://cdn/clip.m3u8".to_string()),
        },
    )
    .await
    .unwrap();
    assert_eq!(completed.status, AssetStatus::Complete);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let active = scheduler.active_work_for_render_agent(kinds::VIDEO).unwrap();
        if active.active_ids.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "serving node kept the delegated slot");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    scheduler.stop().await;
}
