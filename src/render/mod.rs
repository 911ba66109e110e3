//! Renderer strategies.
//!
//! A [`Renderer`] performs the domain transformation for one renderer kind.
//! Workers own the status bookkeeping: they load the asset, open the commit
//! session, call [`Renderer::render`] and close the session with whatever the
//! renderer returned. A renderer reports its outcome as a value and records
//! result attributes on the [`RenderJob`]; it never writes the asset's
//! status itself.
//!
//! # Built-in Kinds
//!
//! | Kind | Renderer | Tools |
//! |------|----------|-------|
//! | `imageMagickRenderAgent` | [`ImageRenderer`] | `convert`, `identify`, `pdfinfo` |
//! | `documentRenderAgent` | [`DocumentRenderer`] | `soffice`, `pdfinfo` |
//! | `videoRenderAgent` | [`VideoRenderer`] | HTTP transcoding service |

pub mod completion;
pub mod document;
pub mod image;
pub mod process;
pub mod transfer;
pub mod video;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::assets::{Attributes, GeneratedAsset, SourceAsset};
use crate::error::ErrorCode;
use crate::scheduler::{RendererRegistry, WorkAdmission};
use crate::storage::AssetStore;
use crate::template::{kinds, Template, TemplateCatalog};

pub use completion::{complete_delegated, DelegatedResult};
pub use document::DocumentRenderer;
pub use image::ImageRenderer;
pub use process::ToolError;
pub use transfer::{DefaultDownloader, Downloader, LocalUploader, Uploader, UrlStyle};
pub use video::VideoRenderer;

/// Non-failure outcome of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The output was uploaded.
    Complete,
    /// An external service finishes the job and reports back out of band.
    Delegated,
}

/// One dispatched render: the asset as loaded, plus attributes the
/// renderer records for the final status write.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub asset: GeneratedAsset,
    pub attributes: Attributes,
}

impl RenderJob {
    pub fn new(asset: GeneratedAsset) -> Self {
        Self {
            asset,
            attributes: Attributes::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.asset.id
    }

    /// Records a result attribute, replacing earlier values for `key`.
    pub fn record(&mut self, key: &str, value: impl ToString) {
        self.attributes.set(key, value);
    }
}

/// Renderer strategy for one kind.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders `job`. Errors are the code recorded as `failed:<code>`.
    async fn render(&self, job: &mut RenderJob) -> Result<Outcome, ErrorCode>;
}

/// Everything a renderer needs, handed to its factory once per worker.
#[derive(Clone)]
pub struct RenderContext {
    pub kind: String,
    pub admission: Arc<WorkAdmission>,
    pub downloader: Arc<dyn Downloader>,
    /// Free-form settings from the kind's render agent configuration.
    pub params: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn store(&self) -> &Arc<dyn AssetStore> {
        self.admission.store()
    }

    pub fn catalog(&self) -> &Arc<dyn TemplateCatalog> {
        self.admission.catalog()
    }

    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        self.admission.uploader()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The template the asset renders with.
    pub async fn load_template(&self, asset: &GeneratedAsset) -> Result<Template, ErrorCode> {
        self.catalog()
            .find_by_id(&asset.template_id)
            .await
            .map_err(|e| {
                warn!(id = %asset.id, template_id = %asset.template_id, error = %e, "Template lookup failed");
                ErrorCode::NoTemplatesFoundForId
            })
    }

    /// The source form the asset was created from.
    pub async fn load_source(&self, asset: &GeneratedAsset) -> Result<SourceAsset, ErrorCode> {
        let forms = self
            .store()
            .find_source_by_id(&asset.source_id)
            .await
            .map_err(|e| {
                warn!(id = %asset.id, source_id = %asset.source_id, error = %e, "Source lookup failed");
                ErrorCode::NoSourceAssetForId
            })?;

        forms
            .into_iter()
            .find(|form| form.id_type == asset.source_type)
            .ok_or(ErrorCode::NoSourceAssetForId)
    }

    /// Downloads the first declared source URL that works.
    pub async fn download_any(&self, source: &SourceAsset) -> Result<NamedTempFile, ErrorCode> {
        for url in source.source_urls() {
            match self.downloader.download(url, source).await {
                Ok(file) => return Ok(file),
                Err(e) => {
                    warn!(source_id = %source.id, url = %url, error = %e, "Download failed, trying next URL");
                }
            }
        }
        Err(ErrorCode::NoDownloadUrlsWork)
    }

    pub async fn upload(&self, destination: &str, path: &Path) -> Result<(), ErrorCode> {
        self.uploader()
            .upload(destination, path)
            .await
            .map_err(|e| {
                warn!(destination = %destination, error = %e, "Upload failed");
                e.upload_code()
            })
    }
}

/// Registry with the three built-in renderers.
pub fn builtin_registry() -> RendererRegistry {
    RendererRegistry::new()
        .with(kinds::IMAGE_MAGICK, |ctx| {
            Arc::new(ImageRenderer::new(ctx.clone())) as Arc<dyn Renderer>
        })
        .with(kinds::DOCUMENT, |ctx| {
            Arc::new(DocumentRenderer::new(ctx.clone())) as Arc<dyn Renderer>
        })
        .with(kinds::VIDEO, |ctx| {
            Arc::new(VideoRenderer::new(ctx.clone())) as Arc<dyn Renderer>
        })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for renderer tests.

    use super::*;
    use crate::assets::{attrs, AssetStatus};
    use crate::config::{RenderAgentConfig, SchedulerSettings};
    use crate::scheduler::{CapacityLedger, FileTypePolicy};
    use crate::storage::MemoryAssetStore;
    use crate::template::StaticTemplateCatalog;
    use std::path::PathBuf;
    use std::time::Duration;

    pub struct Fixture {
        pub ctx: RenderContext,
        pub dir: tempfile::TempDir,
    }

    impl Fixture {
        pub fn new(kind: &str) -> Self {
            let dir = tempfile::TempDir::new().unwrap();
            let catalog = Arc::new(StaticTemplateCatalog::with_defaults(Vec::new()).unwrap());
            let store = Arc::new(MemoryAssetStore::new(catalog.clone()));
            let uploader = Arc::new(LocalUploader::new(dir.path().join("out")));
            let policy = FileTypePolicy::new(
                &RenderAgentConfig::defaults(),
                &SchedulerSettings::default(),
            );
            let admission = Arc::new(WorkAdmission::new(
                store,
                catalog,
                uploader,
                CapacityLedger::default(),
                Default::default(),
                policy,
            ));

            let ctx = RenderContext {
                kind: kind.to_string(),
                admission,
                downloader: Arc::new(DefaultDownloader::new(
                    dir.path().join("in"),
                    Duration::from_secs(5),
                )),
                params: BTreeMap::new(),
            };
            Self { ctx, dir }
        }

        pub fn input_path(&self, name: &str) -> PathBuf {
            self.dir.path().join("in").join(name)
        }

        /// Stores a source whose only URL is `url` and a processing asset for it.
        pub async fn job(&self, url: &str, file_type: &str, template_id: &str) -> RenderJob {
            let source = SourceAsset::origin("src-1").with_attributes(
                Attributes::new()
                    .with(attrs::SOURCE, url)
                    .with(attrs::TYPE, file_type),
            );
            self.ctx.store().store_source(&source).await.unwrap();

            let mut asset = GeneratedAsset::new(&source, template_id, "local:///src-1/small/0");
            asset.set_status(AssetStatus::Scheduled);
            self.ctx.store().store_generated(&asset).await.unwrap();
            RenderJob::new(asset)
        }
    }
}
