//! Asset storage engines.
//!
//! Every engine implements [`AssetStore`], including the queuing primitive
//! [`AssetStore::claim_waiting_work`]. Its contract is the same everywhere:
//! two concurrent claims never hand out the same asset.
//!
//! # Engines
//!
//! - **Memory**: single mutation pass under a mutex, for tests and single-node use
//! - **Postgres**: rows deleted from a `waiting_generated_assets` index table inside
//!   a transaction (`FOR UPDATE SKIP LOCKED`)
//! - **Redis**: per-group waiting lists drained with `LPOP`, which Redis executes atomically
//!
//! # Usage
//!
//! ```rust,ignore
//! use preview::storage::{AssetStore, MemoryAssetStore};
//!
//! let store = MemoryAssetStore::new(catalog.clone());
//! store.store_generated(&asset).await?;
//! let claimed = store.claim_waiting_work("imageMagickRenderAgent", 8).await?;
//! ```

pub mod database;
pub mod keyvalue;
pub mod memory;
pub mod migrations;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::assets::{AssetStatus, GeneratedAsset, SourceAsset};
use crate::config::{StorageConfig, StorageEngine};
use crate::error::TemplateError;
use crate::template::TemplateCatalog;

pub use database::PgAssetStore;
pub use keyvalue::RedisAssetStore;
pub use memory::MemoryAssetStore;
pub use migrations::{MigrationError, MigrationRunner};

/// Errors that can occur during asset storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The backing service could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backing service rejected an operation.
    #[error("Query failed: {0}")]
    Query(String),

    /// A status update would move the state machine backwards.
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: AssetStatus,
        to: AssetStatus,
    },

    /// The template catalog could not resolve a template or group.
    #[error("Template lookup failed: {0}")]
    Template(#[from] TemplateError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Transport-level failures; the sweep skips a cycle on these.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Query(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound(e.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(e.to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Self::Connection(e.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            Self::Connection(e.to_string())
        } else {
            Self::Query(e.to_string())
        }
    }
}

/// Persistent storage for source and generated assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Persists a source asset form, replacing an existing `(id, id_type)` row.
    async fn store_source(&self, asset: &SourceAsset) -> Result<(), StoreError>;

    /// Returns every form stored for `id`; empty when none exist.
    async fn find_source_by_id(&self, id: &str) -> Result<Vec<SourceAsset>, StoreError>;

    /// Persists a new generated asset.
    ///
    /// Waiting assets become claimable under their template's dispatch group.
    /// Scheduled assets go straight to the active set.
    async fn store_generated(&self, asset: &GeneratedAsset) -> Result<(), StoreError>;

    /// Persists status and attribute changes, keeping the waiting and
    /// active sets in step with the new status.
    async fn update_generated(&self, asset: &GeneratedAsset) -> Result<(), StoreError>;

    async fn find_generated_by_id(&self, id: &str) -> Result<GeneratedAsset, StoreError>;

    /// Returns the assets found among `ids`; unknown ids are skipped.
    async fn find_generated_by_ids(&self, ids: &[String])
        -> Result<Vec<GeneratedAsset>, StoreError>;

    async fn find_generated_by_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<GeneratedAsset>, StoreError>;

    /// Atomically moves up to `count` waiting assets routed to `render_kind`
    /// to `scheduled` and returns them.
    async fn claim_waiting_work(
        &self,
        render_kind: &str,
        count: usize,
    ) -> Result<Vec<GeneratedAsset>, StoreError>;

    /// Ids currently in the engine's active set.
    async fn active_generated_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Rejects updates that would move an asset backwards.
pub(crate) fn check_transition(
    id: &str,
    current: &AssetStatus,
    next: &AssetStatus,
) -> Result<(), StoreError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: id.to_string(),
            from: current.clone(),
            to: next.clone(),
        })
    }
}

/// Opens the engine selected by `config`.
pub async fn open_store(
    config: &StorageConfig,
    catalog: Arc<dyn TemplateCatalog>,
) -> Result<Arc<dyn AssetStore>, StoreError> {
    let store: Arc<dyn AssetStore> = match config.engine {
        StorageEngine::Memory => Arc::new(MemoryAssetStore::new(catalog)),
        StorageEngine::Postgres => {
            let store =
                PgAssetStore::connect(&config.database_url, config.max_connections, catalog)
                    .await?;
            store.run_migrations().await?;
            Arc::new(store)
        }
        StorageEngine::Redis => Arc::new(
            RedisAssetStore::connect(&config.redis_url, &config.key_prefix, catalog).await?,
        ),
    };
    Ok(store)
}
