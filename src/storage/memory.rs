//! In-memory asset store.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::assets::{AssetStatus, GeneratedAsset, SourceAsset};
use crate::template::TemplateCatalog;

use super::{check_transition, AssetStore, StoreError};

#[derive(Default)]
struct MemoryState {
    /// Source forms keyed by id, one entry per id type.
    sources: HashMap<String, Vec<SourceAsset>>,
    generated: HashMap<String, GeneratedAsset>,
    by_source: HashMap<String, Vec<String>>,
    /// FIFO of waiting ids per dispatch group. Ids leave lazily: an id
    /// whose entry in `waiting_group` is gone is skipped when popped.
    waiting: HashMap<String, VecDeque<String>>,
    waiting_group: HashMap<String, String>,
    active: BTreeSet<String>,
}

impl MemoryState {
    fn enqueue_waiting(&mut self, id: &str, group: String) {
        self.waiting
            .entry(group.clone())
            .or_default()
            .push_back(id.to_string());
        self.waiting_group.insert(id.to_string(), group);
    }

    fn apply_bookkeeping(&mut self, id: &str, status: &AssetStatus) {
        if status.is_active() {
            self.waiting_group.remove(id);
            self.active.insert(id.to_string());
        } else if status.is_terminal() {
            self.waiting_group.remove(id);
            self.active.remove(id);
        }
    }
}

/// Asset store that keeps everything in process memory.
///
/// Claims run as one pass under the state mutex, so concurrent claims
/// cannot overlap.
pub struct MemoryAssetStore {
    catalog: Arc<dyn TemplateCatalog>,
    state: Mutex<MemoryState>,
}

impl MemoryAssetStore {
    pub fn new(catalog: Arc<dyn TemplateCatalog>) -> Self {
        Self {
            catalog,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Number of ids currently claimable.
    pub async fn waiting_count(&self) -> usize {
        self.state.lock().await.waiting_group.len()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn store_source(&self, asset: &SourceAsset) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let forms = state.sources.entry(asset.id.clone()).or_default();
        forms.retain(|existing| existing.id_type != asset.id_type);
        forms.push(asset.clone());
        Ok(())
    }

    async fn find_source_by_id(&self, id: &str) -> Result<Vec<SourceAsset>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sources.get(id).cloned().unwrap_or_default())
    }

    async fn store_generated(&self, asset: &GeneratedAsset) -> Result<(), StoreError> {
        let group = match asset.status {
            AssetStatus::Waiting => Some(self.catalog.find_by_id(&asset.template_id).await?.group),
            _ => None,
        };

        let mut state = self.state.lock().await;
        state.generated.insert(asset.id.clone(), asset.clone());
        state
            .by_source
            .entry(asset.source_id.clone())
            .or_default()
            .push(asset.id.clone());
        match group {
            Some(group) => state.enqueue_waiting(&asset.id, group),
            None => state.apply_bookkeeping(&asset.id, &asset.status),
        }
        Ok(())
    }

    async fn update_generated(&self, asset: &GeneratedAsset) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let current = state
            .generated
            .get(&asset.id)
            .ok_or_else(|| StoreError::NotFound(format!("generated asset {}", asset.id)))?;
        check_transition(&asset.id, &current.status, &asset.status)?;

        state.generated.insert(asset.id.clone(), asset.clone());
        state.apply_bookkeeping(&asset.id, &asset.status);
        Ok(())
    }

    async fn find_generated_by_id(&self, id: &str) -> Result<GeneratedAsset, StoreError> {
        let state = self.state.lock().await;
        state
            .generated
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("generated asset {}", id)))
    }

    async fn find_generated_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.generated.get(id).cloned())
            .collect())
    }

    async fn find_generated_by_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        let state = self.state.lock().await;
        let ids = state.by_source.get(source_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| state.generated.get(id).cloned())
            .collect())
    }

    async fn claim_waiting_work(
        &self,
        render_kind: &str,
        count: usize,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let groups = self.catalog.groups_for_render_service(render_kind).await?;

        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();

        for group in groups {
            while claimed.len() < count {
                let Some(id) = state.waiting.get_mut(&group).and_then(VecDeque::pop_front) else {
                    break;
                };
                if state.waiting_group.remove(&id).is_none() {
                    continue;
                }
                let Some(asset) = state.generated.get_mut(&id) else {
                    continue;
                };
                if asset.status != AssetStatus::Waiting {
                    continue;
                }
                asset.set_status(AssetStatus::Scheduled);
                claimed.push(asset.clone());
                state.active.insert(id);
            }
        }

        Ok(claimed)
    }

    async fn active_generated_ids(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.active.iter().cloned().collect())
    }
}
