//! Out-of-band completion of delegated renders.

use tracing::{info, warn};

use crate::assets::{attrs, AssetStatus, GeneratedAsset};
use crate::error::{ErrorCode, SchedulerError};
use crate::scheduler::WorkAdmission;

/// What the external service reported for a delegated render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegatedResult {
    Succeeded { streaming_url: Option<String> },
    Failed(ErrorCode),
}

/// Records the final status of a delegated asset and frees its slot.
///
/// The asset's kind comes from its template. The slot is freed even when
/// the status write fails, since the external job is finished either way.
/// When `admission` does not own the slot (the callback ran in another
/// process), the serving node frees it on its next reconcile.
pub async fn complete_delegated(
    admission: &WorkAdmission,
    id: &str,
    result: DelegatedResult,
) -> Result<GeneratedAsset, SchedulerError> {
    let mut asset = admission.store().find_generated_by_id(id).await?;
    let template = admission.catalog().find_by_id(&asset.template_id).await?;

    let status = match result {
        DelegatedResult::Succeeded { streaming_url } => {
            if let Some(url) = streaming_url {
                asset.attributes.set(attrs::STREAMING_URL, url);
            }
            AssetStatus::Complete
        }
        DelegatedResult::Failed(code) => AssetStatus::Failed(code),
    };
    asset.set_status(status);

    let persisted = admission.store().update_generated(&asset).await;
    admission.remove_work(&template.render_agent, id);

    if let Err(e) = persisted {
        warn!(id = %id, error = %e, "Failed to persist delegated completion");
        return Err(e.into());
    }

    info!(id = %id, status = %asset.status, "Delegated render finished");
    Ok(asset)
}
