//! Work admission: creating generated assets and deciding when they run.
//!
//! Every new or swept asset goes through the same decision. If its kind has
//! a free capacity slot the asset is persisted as `scheduled` and queued
//! once the write lands; otherwise it is persisted as `waiting` for the
//! sweep. Renderers reach this type through their context to fan out
//! derived work, so it holds no reference back to the worker pools.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::assets::{attrs, AssetStatus, Attributes, GeneratedAsset, SourceAsset};
use crate::config::{RenderAgentConfig, SchedulerSettings};
use crate::error::{SchedulerError, TemplateError};
use crate::metrics::MetricsCollector;
use crate::render::Uploader;
use crate::storage::AssetStore;
use crate::template::{kinds, Template, TemplateCatalog};

use super::capacity::{ActiveWork, CapacityLedger};
use super::queue::{DispatchQueue, PendingDispatch};

/// Routes a declared file type to the template ids it renders with.
#[derive(Debug, Clone, Default)]
pub struct FileTypePolicy {
    /// Lowercased file type to the enabled kind that supports it.
    supported: BTreeMap<String, String>,
    document_template_ids: Vec<String>,
    video_template_ids: Vec<String>,
    legacy_template_ids: Vec<String>,
}

impl FileTypePolicy {
    /// Builds the table from the enabled render agents.
    pub fn new(agents: &BTreeMap<String, RenderAgentConfig>, settings: &SchedulerSettings) -> Self {
        let mut supported = BTreeMap::new();
        for (kind, agent) in agents.iter().filter(|(_, a)| a.enabled) {
            for file_type in &agent.supported_file_types {
                supported
                    .entry(file_type.to_lowercase())
                    .or_insert_with(|| kind.clone());
            }
        }

        Self {
            supported,
            document_template_ids: settings.document_template_ids.clone(),
            video_template_ids: settings.video_template_ids.clone(),
            legacy_template_ids: settings.legacy_template_ids.clone(),
        }
    }

    /// Kind that supports `file_type`, if any.
    pub fn kind_for(&self, file_type: &str) -> Option<&str> {
        self.supported
            .get(&file_type.to_lowercase())
            .map(String::as_str)
    }

    /// Template ids for `file_type`.
    pub fn template_ids_for(&self, file_type: &str) -> Result<&[String], SchedulerError> {
        let kind = self
            .kind_for(file_type)
            .ok_or_else(|| SchedulerError::UnsupportedFileType(file_type.to_lowercase()))?;

        Ok(match kind {
            kinds::DOCUMENT => &self.document_template_ids,
            kinds::VIDEO => &self.video_template_ids,
            _ => &self.legacy_template_ids,
        })
    }

    pub fn legacy_template_ids(&self) -> &[String] {
        &self.legacy_template_ids
    }
}

/// Admission decisions, capacity bookkeeping and the periodic sweep.
pub struct WorkAdmission {
    store: Arc<dyn AssetStore>,
    catalog: Arc<dyn TemplateCatalog>,
    uploader: Arc<dyn Uploader>,
    ledger: CapacityLedger,
    queues: HashMap<String, Arc<DispatchQueue>>,
    policy: FileTypePolicy,
    /// Set on stop; later admissions leave work waiting.
    halted: AtomicBool,
    metrics: MetricsCollector,
}

impl WorkAdmission {
    /// # Arguments
    ///
    /// * `ledger` - Budgets for the kinds that have workers
    /// * `queues` - One dispatch queue per budgeted kind
    pub fn new(
        store: Arc<dyn AssetStore>,
        catalog: Arc<dyn TemplateCatalog>,
        uploader: Arc<dyn Uploader>,
        ledger: CapacityLedger,
        queues: HashMap<String, Arc<DispatchQueue>>,
        policy: FileTypePolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            uploader,
            ledger,
            queues,
            policy,
            halted: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn TemplateCatalog> {
        &self.catalog
    }

    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        &self.uploader
    }

    pub fn policy(&self) -> &FileTypePolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    // ===== Creation =====

    /// Creates work for a caller-submitted file, routed by its type.
    ///
    /// Fails before anything is persisted when no enabled renderer supports
    /// `file_type` or a routed template is missing.
    pub async fn create_work(
        &self,
        source_id: &str,
        url: &str,
        file_type: &str,
        size: u64,
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        let template_ids = self.policy.template_ids_for(file_type)?.to_vec();
        let templates = self.resolve_templates(&template_ids).await?;

        let source = SourceAsset::origin(source_id).with_attributes(
            Attributes::new()
                .with(attrs::SOURCE, url)
                .with(attrs::TYPE, file_type.to_lowercase())
                .with(attrs::SIZE, size),
        );
        self.store.store_source(&source).await?;

        info!(
            source_id = %source_id,
            file_type = %file_type,
            templates = templates.len(),
            "Creating work"
        );
        self.admit_all(&source, &templates, 0..1, false).await
    }

    /// Creates work for explicit template ids, bypassing the file-type table.
    pub async fn create_work_from_templates(
        &self,
        source_id: &str,
        url: &str,
        attributes: &Attributes,
        template_ids: &[String],
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        let templates = self.resolve_templates(template_ids).await?;

        let mut source = SourceAsset::origin(source_id).with_attributes(attributes.clone());
        if !source.attributes.get(attrs::SOURCE).contains(&url.to_string()) {
            source.attributes.append(attrs::SOURCE, url);
        }
        self.store.store_source(&source).await?;

        info!(
            source_id = %source_id,
            templates = templates.len(),
            "Creating work from templates"
        );
        self.admit_all(&source, &templates, 0..1, false).await
    }

    /// Creates one asset per page in `[first_page, last_page)` and template.
    /// Every asset carries its `page` attribute, page 0 included.
    pub async fn create_derived_work(
        &self,
        source: &SourceAsset,
        templates: &[Template],
        first_page: u32,
        last_page: u32,
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        let created = self
            .admit_all(source, templates, first_page..last_page, true)
            .await?;

        debug!(
            source_id = %source.id,
            source_type = %source.id_type,
            first_page = first_page,
            last_page = last_page,
            created = created.len(),
            "Created derived work"
        );
        Ok(created)
    }

    /// Builds and admits one asset per page and template. Caller-submitted
    /// work is not paged and carries no `page` attribute.
    async fn admit_all(
        &self,
        source: &SourceAsset,
        templates: &[Template],
        pages: std::ops::Range<u32>,
        paged: bool,
    ) -> Result<Vec<GeneratedAsset>, SchedulerError> {
        let mut created = Vec::new();
        for page in pages {
            for template in templates {
                let location = self.uploader.url(source, template, page);
                let mut asset = GeneratedAsset::new(source, &template.id, location);
                if paged {
                    asset = asset.with_page(page);
                }
                created.push(self.admit(asset, template).await?);
            }
        }
        Ok(created)
    }

    async fn resolve_templates(&self, ids: &[String]) -> Result<Vec<Template>, SchedulerError> {
        if ids.is_empty() {
            return Err(SchedulerError::TemplatesNotFound(Vec::new()));
        }
        match self.catalog.find_by_ids(ids).await {
            Ok(templates) => Ok(templates),
            Err(TemplateError::NotFound(_)) => Err(SchedulerError::TemplatesNotFound(ids.to_vec())),
            Err(e) => Err(e.into()),
        }
    }

    // ===== Admission =====

    /// Decides the initial status for a new asset. A `scheduled` decision
    /// has already taken the slot and carries the enqueue to run after the
    /// status is persisted.
    pub fn can_dispatch(
        &self,
        id: &str,
        template: &Template,
    ) -> (AssetStatus, Option<PendingDispatch>) {
        let kind = template.render_agent.as_str();
        let Some(queue) = self.queues.get(kind) else {
            return (AssetStatus::Waiting, None);
        };
        if self.halted.load(Ordering::SeqCst) {
            return (AssetStatus::Waiting, None);
        }

        if self.ledger.try_reserve(kind, id) {
            self.metrics
                .set_active_work(kind, self.ledger.active_count(kind));
            (
                AssetStatus::Scheduled,
                Some(PendingDispatch::new(Arc::clone(queue), id)),
            )
        } else {
            (AssetStatus::Waiting, None)
        }
    }

    async fn admit(
        &self,
        mut asset: GeneratedAsset,
        template: &Template,
    ) -> Result<GeneratedAsset, SchedulerError> {
        let (status, pending) = self.can_dispatch(&asset.id, template);
        asset.set_status(status);

        if let Err(e) = self.store.store_generated(&asset).await {
            if pending.is_some() {
                self.ledger.release(&template.render_agent, &asset.id);
            }
            return Err(e.into());
        }

        self.metrics
            .record_work_created(&template.render_agent, pending.is_some());
        if let Some(pending) = pending {
            pending.dispatch();
        }
        Ok(asset)
    }

    // ===== Sweep =====

    /// Claims waiting work for every kind with free slots and dispatches it.
    ///
    /// A store error ends the cycle; the next tick retries. Returns the
    /// number of assets dispatched.
    pub async fn sweep(&self) -> usize {
        if self.halted.load(Ordering::SeqCst) {
            return 0;
        }

        let mut dispatched = 0;
        for kind in self.ledger.kinds() {
            let Some(queue) = self.queues.get(&kind) else {
                continue;
            };

            let reserved = self.ledger.reserve_free(&kind);
            if reserved == 0 {
                continue;
            }

            let claimed = match self.store.claim_waiting_work(&kind, reserved).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    self.ledger.cancel_reserved(&kind, reserved);
                    warn!(kind = %kind, error = %e, "Sweep claim failed, skipping cycle");
                    return dispatched;
                }
            };

            let unused = reserved.saturating_sub(claimed.len());
            for mut asset in claimed.into_iter().take(reserved) {
                self.ledger.commit_reserved(&kind, &asset.id);
                asset.set_status(AssetStatus::Scheduled);
                if let Err(e) = self.store.update_generated(&asset).await {
                    warn!(kind = %kind, id = %asset.id, error = %e, "Failed to re-assert scheduled status");
                }
                if queue.enqueue(asset.id) {
                    dispatched += 1;
                }
            }
            self.ledger.cancel_reserved(&kind, unused);

            let claimed_now = reserved - unused;
            self.metrics.record_sweep_claimed(&kind, claimed_now);
            self.metrics
                .set_active_work(&kind, self.ledger.active_count(&kind));
            if claimed_now > 0 {
                debug!(kind = %kind, claimed = claimed_now, "Sweep claimed waiting work");
            }
        }

        dispatched
    }

    /// Frees slots whose asset the store already records as terminal.
    ///
    /// Delegated work is finished by an out-of-band callback that may run in
    /// another process and never reach this ledger. Returns the number of
    /// slots freed; a store error skips the kind until the next tick.
    pub async fn reconcile(&self) -> usize {
        let mut freed = 0;
        for kind in self.ledger.kinds() {
            let active = self.ledger.active_work(&kind).active_ids;
            if active.is_empty() {
                continue;
            }

            let assets = match self.store.find_generated_by_ids(&active).await {
                Ok(assets) => assets,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Reconcile lookup failed, skipping kind");
                    continue;
                }
            };

            for asset in assets.iter().filter(|a| a.status.is_terminal()) {
                if self.release(&kind, &asset.id) {
                    debug!(kind = %kind, id = %asset.id, status = %asset.status, "Released finished work");
                    freed += 1;
                }
            }
        }
        freed
    }

    // ===== Capacity =====

    /// Frees `id`'s slot after a terminal status event.
    pub fn release(&self, kind: &str, id: &str) -> bool {
        let released = self.ledger.release(kind, id);
        if released {
            self.metrics
                .set_active_work(kind, self.ledger.active_count(kind));
        }
        released
    }

    /// Clears `id` from the active set without a status transition.
    pub fn remove_work(&self, kind: &str, id: &str) -> bool {
        let removed = self.release(kind, id);
        info!(kind = %kind, id = %id, removed = removed, "Removed work from active set");
        removed
    }

    pub fn active_work(&self, kind: &str) -> ActiveWork {
        self.ledger.active_work(kind)
    }

    /// Stops dispatching. Work created afterwards is persisted as waiting.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn queues(&self) -> impl Iterator<Item = &Arc<DispatchQueue>> {
        self.queues.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::LocalUploader;
    use crate::storage::{MemoryAssetStore, StoreError};
    use crate::template::{
        StaticTemplateCatalog, DOCUMENT_TEMPLATE_ID, LEGACY_TEMPLATE_IDS, SMALL_TEMPLATE_ID,
    };
    use async_trait::async_trait;

    struct Harness {
        admission: WorkAdmission,
        store: Arc<MemoryAssetStore>,
        image_queue: Arc<DispatchQueue>,
    }

    fn harness(image_workers: usize) -> Harness {
        let catalog = Arc::new(StaticTemplateCatalog::with_defaults(Vec::new()).unwrap());
        let store = Arc::new(MemoryAssetStore::new(catalog.clone()));
        let ledger = CapacityLedger::new(4);
        ledger.configure(kinds::IMAGE_MAGICK, image_workers);

        let image_queue = Arc::new(DispatchQueue::new(kinds::IMAGE_MAGICK, 200));
        let mut queues = HashMap::new();
        queues.insert(kinds::IMAGE_MAGICK.to_string(), Arc::clone(&image_queue));

        let admission = WorkAdmission::new(
            store.clone(),
            catalog,
            Arc::new(LocalUploader::new("/tmp/preview-test")),
            ledger,
            queues,
            FileTypePolicy::new(&RenderAgentConfig::defaults(), &SchedulerSettings::default()),
        );
        Harness {
            admission,
            store,
            image_queue,
        }
    }

    #[test]
    fn test_file_type_policy_routing() {
        let policy =
            FileTypePolicy::new(&RenderAgentConfig::defaults(), &SchedulerSettings::default());

        assert_eq!(policy.kind_for("DOCX"), Some(kinds::DOCUMENT));
        assert_eq!(
            policy.template_ids_for("docx").unwrap(),
            &[DOCUMENT_TEMPLATE_ID.to_string()]
        );
        assert_eq!(policy.template_ids_for("JPG").unwrap().len(), 4);
        assert!(matches!(
            policy.template_ids_for("exe"),
            Err(SchedulerError::UnsupportedFileType(t)) if t == "exe"
        ));
    }

    #[test]
    fn test_file_type_policy_ignores_disabled_agents() {
        let mut agents = RenderAgentConfig::defaults();
        if let Some(video) = agents.get_mut(kinds::VIDEO) {
            video.enabled = false;
        }
        let policy = FileTypePolicy::new(&agents, &SchedulerSettings::default());
        assert!(policy.template_ids_for("mp4").is_err());
    }

    #[tokio::test]
    async fn test_create_work_schedules_within_budget() {
        let h = harness(1);
        let created = h
            .admission
            .create_work("src-1", "http://files/a.jpg", "JPG", 1024)
            .await
            .unwrap();

        assert_eq!(created.len(), LEGACY_TEMPLATE_IDS.len());
        assert!(created.iter().all(|a| a.status == AssetStatus::Scheduled));
        assert!(created.iter().all(|a| !a.attributes.contains(attrs::PAGE)));
        assert_eq!(h.admission.active_work(kinds::IMAGE_MAGICK).active_ids.len(), 4);

        let sources = h.store.find_source_by_id("src-1").await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].file_type().as_deref(), Some("jpg"));
        assert_eq!(sources[0].size(), Some(1024));

        let rx = h.image_queue.receiver();
        for _ in 0..4 {
            assert!(rx.next().await.is_some());
        }
    }

    #[tokio::test]
    async fn test_create_work_over_budget_waits() {
        let h = harness(1);
        h.admission
            .create_work("src-1", "http://files/a.jpg", "jpg", 1)
            .await
            .unwrap();
        let second = h
            .admission
            .create_work("src-2", "http://files/b.jpg", "jpg", 1)
            .await
            .unwrap();

        assert!(second.iter().all(|a| a.status == AssetStatus::Waiting));
        assert_eq!(h.store.waiting_count().await, 4);
        assert_eq!(h.admission.active_work(kinds::IMAGE_MAGICK).active_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_unsupported_type_creates_nothing() {
        let h = harness(1);
        let err = h
            .admission
            .create_work("src-1", "http://files/a.exe", "exe", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnsupportedFileType(_)));
        assert!(h.store.find_source_by_id("src-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_templates_rejected() {
        let h = harness(1);
        let err = h
            .admission
            .create_work_from_templates(
                "src-1",
                "http://files/a.jpg",
                &Attributes::new(),
                &["missing".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TemplatesNotFound(ids) if ids == vec!["missing".to_string()]));
        assert!(h.store.find_source_by_id("src-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_templates_bypass_file_type_table() {
        let h = harness(1);
        let attributes = Attributes::new()
            .with(attrs::TYPE, "exe")
            .with(attrs::SOURCE, "http://mirror/a.exe");
        let created = h
            .admission
            .create_work_from_templates(
                "src-1",
                "http://files/a.exe",
                &attributes,
                &[SMALL_TEMPLATE_ID.to_string()],
            )
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].template_id, SMALL_TEMPLATE_ID);
        assert_eq!(created[0].status, AssetStatus::Scheduled);

        let sources = h.store.find_source_by_id("src-1").await.unwrap();
        assert_eq!(
            sources[0].attributes.get(attrs::SOURCE),
            &["http://mirror/a.exe".to_string(), "http://files/a.exe".to_string()]
        );
    }

    #[tokio::test]
    async fn test_kind_without_budget_leaves_work_waiting() {
        let h = harness(1);
        let created = h
            .admission
            .create_work("src-1", "http://files/a.docx", "docx", 1)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, AssetStatus::Waiting);
    }

    #[tokio::test]
    async fn test_derived_work_pages() {
        let h = harness(0);
        let source = SourceAsset::new("src-1", crate::assets::id_types::PDF);
        let templates = h
            .admission
            .catalog()
            .find_by_ids(&[SMALL_TEMPLATE_ID.to_string()])
            .await
            .unwrap();

        let created = h
            .admission
            .create_derived_work(&source, &templates, 1, 4)
            .await
            .unwrap();
        let pages: Vec<u32> = created.iter().map(|a| a.page()).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(created.iter().all(|a| a.attributes.contains(attrs::PAGE)));
        assert_eq!(created[2].location, "local:///src-1/small/3");
    }

    #[tokio::test]
    async fn test_derived_work_first_page_only_keeps_page() {
        let h = harness(1);
        let source = SourceAsset::new("doc-1", crate::assets::id_types::PDF);
        let ids: Vec<String> = LEGACY_TEMPLATE_IDS.iter().map(|id| id.to_string()).collect();
        let templates = h.admission.catalog().find_by_ids(&ids).await.unwrap();

        let created = h
            .admission
            .create_derived_work(&source, &templates, 0, 1)
            .await
            .unwrap();
        assert_eq!(created.len(), 4);
        for asset in &created {
            assert_eq!(asset.attributes.first(attrs::PAGE), Some("0"));
            let stored = h.store.find_generated_by_id(&asset.id).await.unwrap();
            assert_eq!(stored.attributes.first(attrs::PAGE), Some("0"));
        }
    }

    #[tokio::test]
    async fn test_sweep_respects_limit_and_dispatches() {
        let h = harness(1);
        for i in 0..3 {
            h.admission
                .create_work(&format!("src-{}", i), "http://files/a.jpg", "jpg", 1)
                .await
                .unwrap();
        }
        // 4 scheduled, 8 waiting
        assert_eq!(h.store.waiting_count().await, 8);

        let active: Vec<String> = h.admission.active_work(kinds::IMAGE_MAGICK).active_ids;
        for id in active.iter().take(2) {
            h.admission.release(kinds::IMAGE_MAGICK, id);
        }

        assert_eq!(h.admission.sweep().await, 2);
        assert_eq!(h.store.waiting_count().await, 6);
        assert_eq!(h.admission.active_work(kinds::IMAGE_MAGICK).active_ids.len(), 4);
        assert_eq!(h.admission.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_halt_leaves_new_work_waiting() {
        let h = harness(1);
        h.admission.halt();
        let created = h
            .admission
            .create_work("src-1", "http://files/a.jpg", "jpg", 1)
            .await
            .unwrap();
        assert!(created.iter().all(|a| a.status == AssetStatus::Waiting));
        assert_eq!(h.admission.sweep().await, 0);
    }

    struct FailingStore;

    #[async_trait]
    impl AssetStore for FailingStore {
        async fn store_source(&self, _: &SourceAsset) -> Result<(), StoreError> {
            Ok(())
        }
        async fn find_source_by_id(&self, _: &str) -> Result<Vec<SourceAsset>, StoreError> {
            Ok(Vec::new())
        }
        async fn store_generated(&self, _: &GeneratedAsset) -> Result<(), StoreError> {
            Err(StoreError::Connection("down".to_string()))
        }
        async fn update_generated(&self, _: &GeneratedAsset) -> Result<(), StoreError> {
            Err(StoreError::Connection("down".to_string()))
        }
        async fn find_generated_by_id(&self, id: &str) -> Result<GeneratedAsset, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }
        async fn find_generated_by_ids(
            &self,
            _: &[String],
        ) -> Result<Vec<GeneratedAsset>, StoreError> {
            Ok(Vec::new())
        }
        async fn find_generated_by_source(
            &self,
            _: &str,
        ) -> Result<Vec<GeneratedAsset>, StoreError> {
            Ok(Vec::new())
        }
        async fn claim_waiting_work(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<GeneratedAsset>, StoreError> {
            Err(StoreError::Connection("down".to_string()))
        }
        async fn active_generated_ids(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_reconcile_frees_slots_finished_elsewhere() {
        let h = harness(1);
        let created = h
            .admission
            .create_work("src-1", "http://files/a.jpg", "jpg", 1)
            .await
            .unwrap();
        assert_eq!(h.admission.active_work(kinds::IMAGE_MAGICK).active_ids.len(), 4);

        // Another process finishes one asset; no status event reaches us.
        let mut done = created[0].clone();
        for status in [
            AssetStatus::Processing,
            AssetStatus::Delegated,
            AssetStatus::Complete,
        ] {
            done.set_status(status);
            h.store.update_generated(&done).await.unwrap();
        }

        assert_eq!(h.admission.reconcile().await, 1);
        let active = h.admission.active_work(kinds::IMAGE_MAGICK).active_ids;
        assert_eq!(active.len(), 3);
        assert!(!active.contains(&done.id));

        // Still-running work keeps its slot.
        assert_eq!(h.admission.reconcile().await, 0);
    }

    #[tokio::test]
    async fn test_store_failures_release_slots() {
        let catalog = Arc::new(StaticTemplateCatalog::with_defaults(Vec::new()).unwrap());
        let ledger = CapacityLedger::new(4);
        ledger.configure(kinds::IMAGE_MAGICK, 1);
        let mut queues = HashMap::new();
        queues.insert(
            kinds::IMAGE_MAGICK.to_string(),
            Arc::new(DispatchQueue::new(kinds::IMAGE_MAGICK, 10)),
        );
        let admission = WorkAdmission::new(
            Arc::new(FailingStore),
            catalog,
            Arc::new(LocalUploader::new("/tmp/preview-test")),
            ledger,
            queues,
            FileTypePolicy::new(&RenderAgentConfig::defaults(), &SchedulerSettings::default()),
        );

        let err = admission
            .create_work("src-1", "http://files/a.jpg", "jpg", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Store(_)));
        assert!(admission.active_work(kinds::IMAGE_MAGICK).active_ids.is_empty());

        // A failed claim skips the cycle and returns every reserved slot.
        assert_eq!(admission.sweep().await, 0);
        assert_eq!(admission.ledger().reserve_free(kinds::IMAGE_MAGICK), 4);
    }
}
