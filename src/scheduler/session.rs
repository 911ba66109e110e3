//! Status-commit sessions.
//!
//! A [`CommitSession`] wraps one render. It accumulates `(status, attributes)`
//! messages and, when closed, performs the single final action: merge the
//! attributes, persist the last status (`failed:unknown-error` when nothing
//! was sent), and publish one [`StatusEvent`].
//!
//! Closing consumes the session. A session dropped without being closed
//! finalizes itself on the current runtime, so every opened session emits
//! exactly one event.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::assets::{AssetStatus, Attributes, GeneratedAsset};
use crate::error::ErrorCode;
use crate::storage::AssetStore;

use super::status::{StatusBus, StatusEvent};

pub struct CommitSession {
    /// `None` once finalized.
    asset: Option<GeneratedAsset>,
    kind: String,
    status: Option<AssetStatus>,
    attributes: Attributes,
    store: Arc<dyn AssetStore>,
    bus: StatusBus,
}

impl CommitSession {
    /// Opens a session and persists `processing` for the asset.
    ///
    /// A failed `processing` write is logged; the render still proceeds and
    /// the terminal write is attempted on close.
    pub async fn begin(
        mut asset: GeneratedAsset,
        kind: impl Into<String>,
        store: Arc<dyn AssetStore>,
        bus: StatusBus,
    ) -> Self {
        let kind = kind.into();
        asset.set_status(AssetStatus::Processing);
        if let Err(e) = store.update_generated(&asset).await {
            warn!(id = %asset.id, kind = %kind, error = %e, "Failed to persist processing status");
        }

        Self {
            asset: Some(asset),
            kind,
            status: None,
            attributes: Attributes::new(),
            store,
            bus,
        }
    }

    /// The asset as of session start.
    pub fn asset(&self) -> Option<&GeneratedAsset> {
        self.asset.as_ref()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Records a status message. The last one sent wins; attributes from
    /// every message are merged.
    pub fn send(&mut self, status: AssetStatus, attributes: &Attributes) {
        self.attributes.merge(attributes);
        self.status = Some(status);
    }

    pub fn complete(&mut self, attributes: &Attributes) {
        self.send(AssetStatus::Complete, attributes);
    }

    pub fn delegate(&mut self, attributes: &Attributes) {
        self.send(AssetStatus::Delegated, attributes);
    }

    pub fn fail(&mut self, code: ErrorCode, attributes: &Attributes) {
        self.send(AssetStatus::Failed(code), attributes);
    }

    /// Persists the final status, publishes it and returns it.
    pub async fn close(mut self) -> AssetStatus {
        match self.asset.take() {
            Some(asset) => {
                let status = self.final_status();
                let attributes = std::mem::take(&mut self.attributes);
                finalize(
                    asset,
                    status,
                    attributes,
                    Arc::clone(&self.store),
                    self.bus.clone(),
                    self.kind.clone(),
                )
                .await
            }
            None => self.final_status(),
        }
    }

    fn final_status(&self) -> AssetStatus {
        self.status
            .clone()
            .unwrap_or(AssetStatus::Failed(ErrorCode::UnknownError))
    }
}

impl Drop for CommitSession {
    fn drop(&mut self) {
        let Some(asset) = self.asset.take() else {
            return;
        };

        let status = self.final_status();
        warn!(id = %asset.id, kind = %self.kind, status = %status, "Commit session dropped without close");

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(finalize(
                    asset,
                    status,
                    std::mem::take(&mut self.attributes),
                    Arc::clone(&self.store),
                    self.bus.clone(),
                    self.kind.clone(),
                ));
            }
            Err(_) => {
                error!(id = %asset.id, kind = %self.kind, "No runtime to finalize commit session");
            }
        }
    }
}

async fn finalize(
    mut asset: GeneratedAsset,
    status: AssetStatus,
    attributes: Attributes,
    store: Arc<dyn AssetStore>,
    bus: StatusBus,
    kind: String,
) -> AssetStatus {
    asset.attributes.merge(&attributes);
    asset.set_status(status.clone());

    if let Err(e) = store.update_generated(&asset).await {
        error!(id = %asset.id, kind = %kind, status = %status, error = %e, "Failed to persist terminal status");
    }

    // Published even when the write failed: capacity is released off this event.
    bus.publish(StatusEvent::new(asset.id, status.clone(), kind))
        .await;
    status
}
