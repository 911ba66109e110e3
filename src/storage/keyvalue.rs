//! Redis-backed asset store.
//!
//! # Key Structure
//!
//! - `{prefix}:source:{id}`: hash of id type to serialized `SourceAsset`
//! - `{prefix}:generated:{id}`: serialized `GeneratedAsset`
//! - `{prefix}:by-source:{source_id}`: list of generated ids for a source
//! - `{prefix}:waiting:{group}`: FIFO list of claimable ids per dispatch group
//! - `{prefix}:active`: set of scheduled or processing ids
//!
//! # Claiming
//!
//! Claims drain the waiting lists with `LPOP key count`. Redis runs each
//! command atomically, so an id popped by one claimer is never seen by
//! another, even across processes. If a transport error interrupts the
//! flip to scheduled, the popped ids not yet flipped are pushed back onto
//! the head of their list and the ids already flipped are still returned.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::assets::{AssetStatus, GeneratedAsset, SourceAsset};
use crate::template::TemplateCatalog;

use super::{check_transition, AssetStore, StoreError};

/// Redis-backed [`AssetStore`].
pub struct RedisAssetStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    prefix: String,
    catalog: Arc<dyn TemplateCatalog>,
}

impl RedisAssetStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Namespace for every key this store writes
    /// * `catalog` - Resolves template dispatch groups
    pub async fn connect(
        redis_url: &str,
        prefix: &str,
        catalog: Arc<dyn TemplateCatalog>,
    ) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::from_connection(redis, prefix, catalog))
    }

    /// Creates a store from an existing connection manager.
    pub fn from_connection(
        redis: ConnectionManager,
        prefix: &str,
        catalog: Arc<dyn TemplateCatalog>,
    ) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
            catalog,
        }
    }

    fn source_key(&self, id: &str) -> String {
        format!("{}:source:{}", self.prefix, id)
    }

    fn generated_key(&self, id: &str) -> String {
        format!("{}:generated:{}", self.prefix, id)
    }

    fn by_source_key(&self, source_id: &str) -> String {
        format!("{}:by-source:{}", self.prefix, source_id)
    }

    fn waiting_key(&self, group: &str) -> String {
        format!("{}:waiting:{}", self.prefix, group)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.prefix)
    }

    async fn load_generated(&self, id: &str) -> Result<Option<GeneratedAsset>, StoreError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(self.generated_key(id)).await?;
        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    /// Writes `asset` and adjusts the waiting list and active set in one
    /// MULTI/EXEC block.
    async fn write_with_indexes(&self, asset: &GeneratedAsset) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(asset)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.generated_key(&asset.id), serialized)
            .ignore();

        if asset.status.is_active() || asset.status.is_terminal() {
            let group = self.catalog.find_by_id(&asset.template_id).await?.group;
            pipe.lrem(self.waiting_key(&group), 0, &asset.id).ignore();
            if asset.status.is_active() {
                pipe.sadd(self.active_key(), &asset.id).ignore();
            } else {
                pipe.srem(self.active_key(), &asset.id).ignore();
            }
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Flips one popped id to scheduled and adds it to the active set.
    /// Returns `None` when the record is gone or no longer waiting.
    async fn schedule_popped(
        &self,
        conn: &mut ConnectionManager,
        id: &str,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        let Some(mut asset) = self.load_generated(id).await? else {
            return Ok(None);
        };
        if asset.status != AssetStatus::Waiting {
            return Ok(None);
        }
        asset.set_status(AssetStatus::Scheduled);

        let serialized = serde_json::to_string(&asset)?;
        redis::pipe()
            .atomic()
            .set(self.generated_key(id), serialized)
            .ignore()
            .sadd(self.active_key(), id)
            .ignore()
            .query_async::<_, ()>(conn)
            .await?;
        Ok(Some(asset))
    }

    /// Puts popped ids back at the head of a group's waiting list.
    async fn requeue(&self, group: &str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let mut conn = self.redis.clone();
        let result: Result<(), redis::RedisError> = conn.lpush(self.waiting_key(group), ids).await;
        match result {
            Ok(()) => {
                tracing::debug!(group = %group, count = ids.len(), "Requeued unclaimed ids");
            }
            Err(e) => {
                tracing::error!(group = %group, ids = ?ids, error = %e, "Failed to requeue popped ids");
            }
        }
    }
}

#[async_trait]
impl AssetStore for RedisAssetStore {
    async fn store_source(&self, asset: &SourceAsset) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(asset)?;
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(self.source_key(&asset.id), &asset.id_type, serialized)
            .await?;
        Ok(())
    }

    async fn find_source_by_id(&self, id: &str) -> Result<Vec<SourceAsset>, StoreError> {
        let mut conn = self.redis.clone();
        let forms: HashMap<String, String> = conn.hgetall(self.source_key(id)).await?;
        let mut sources = forms
            .values()
            .map(|data| serde_json::from_str::<SourceAsset>(data))
            .collect::<Result<Vec<_>, _>>()?;
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn store_generated(&self, asset: &GeneratedAsset) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(asset)?;
        let group = self.catalog.find_by_id(&asset.template_id).await?.group;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.generated_key(&asset.id), serialized)
            .ignore()
            .rpush(self.by_source_key(&asset.source_id), &asset.id)
            .ignore();
        match &asset.status {
            AssetStatus::Waiting => {
                pipe.rpush(self.waiting_key(&group), &asset.id).ignore();
            }
            status if status.is_active() => {
                pipe.sadd(self.active_key(), &asset.id).ignore();
            }
            _ => {}
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn update_generated(&self, asset: &GeneratedAsset) -> Result<(), StoreError> {
        let current = self
            .load_generated(&asset.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("generated asset {}", asset.id)))?;
        check_transition(&asset.id, &current.status, &asset.status)?;
        self.write_with_indexes(asset).await
    }

    async fn find_generated_by_id(&self, id: &str) -> Result<GeneratedAsset, StoreError> {
        self.load_generated(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("generated asset {}", id)))
    }

    async fn find_generated_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.generated_key(id)).collect();
        let mut conn = self.redis.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        values
            .into_iter()
            .flatten()
            .map(|data| serde_json::from_str(&data).map_err(StoreError::from))
            .collect()
    }

    async fn find_generated_by_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.lrange(self.by_source_key(source_id), 0, -1).await?;
        self.find_generated_by_ids(&ids).await
    }

    async fn claim_waiting_work(
        &self,
        render_kind: &str,
        count: usize,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        let groups = self.catalog.groups_for_render_service(render_kind).await?;
        let mut conn = self.redis.clone();
        let mut claimed = Vec::new();

        for group in groups {
            let Some(remaining) = NonZeroUsize::new(count.saturating_sub(claimed.len())) else {
                break;
            };
            let ids: Vec<String> = conn.lpop(self.waiting_key(&group), Some(remaining)).await?;

            let mut popped = ids.into_iter();
            while let Some(id) = popped.next() {
                match self.schedule_popped(&mut conn, &id).await {
                    Ok(Some(asset)) => claimed.push(asset),
                    Ok(None) => {}
                    Err(e) if !e.is_transient() => {
                        tracing::warn!(id = %id, group = %group, error = %e, "Dropping unclaimable waiting id");
                    }
                    Err(e) => {
                        let requeue = requeue_order(id, popped);
                        self.requeue(&group, &requeue).await;
                        if claimed.is_empty() {
                            return Err(e);
                        }
                        tracing::warn!(
                            group = %group,
                            claimed = claimed.len(),
                            error = %e,
                            "Claim stopped early, returning partial batch"
                        );
                        return Ok(claimed);
                    }
                }
            }
        }

        Ok(claimed)
    }

    async fn active_generated_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        let mut ids: Vec<String> = conn.smembers(self.active_key()).await?;
        ids.sort();
        Ok(ids)
    }
}

/// `LPUSH` prepends each value in turn, so the ids that still need a claim,
/// starting with `failed`, are reversed to keep their FIFO order.
fn requeue_order(failed: String, rest: impl Iterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = std::iter::once(failed).chain(rest).collect();
    ids.reverse();
    ids
}
