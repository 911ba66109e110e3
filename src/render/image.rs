//! ImageMagick renderer.
//!
//! Resizes one page or frame of the source into a JPEG at the template's
//! size. Rendering page 0 of a PDF also fans out the remaining pages as
//! derived work for the same template.

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::assets::attrs;
use crate::error::ErrorCode;

use super::process::{image_dimensions, pdf_page_count, run_tool};
use super::{Outcome, RenderContext, RenderJob, Renderer};

pub struct ImageRenderer {
    ctx: RenderContext,
}

impl ImageRenderer {
    pub fn new(ctx: RenderContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Renderer for ImageRenderer {
    async fn render(&self, job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        let source = self.ctx.load_source(&job.asset).await?;
        let file_type = source
            .file_type()
            .ok_or(ErrorCode::CouldNotDetermineFileType)?;
        let template = self.ctx.load_template(&job.asset).await?;

        let (width, height) = match (template.width(), template.height()) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(ErrorCode::CouldNotDetermineRenderSize),
        };
        let density = template
            .density()
            .ok_or(ErrorCode::CouldNotDetermineDensity)?;

        let input = self.ctx.download_any(&source).await?;
        let page = job.asset.page();

        if file_type == "pdf" && page == 0 {
            let pages = match source.pages() {
                Some(pages) => pages,
                None => pdf_page_count(input.path()).await.map_err(|e| {
                    warn!(id = %job.id(), error = %e, "Could not count PDF pages");
                    ErrorCode::CouldNotDeterminePageCount
                })?,
            };
            if pages > 1 {
                self.ctx
                    .admission
                    .create_derived_work(&source, std::slice::from_ref(&template), 1, pages)
                    .await
                    .map_err(|e| {
                        warn!(id = %job.id(), error = %e, "Could not fan out PDF pages");
                        e.code()
                    })?;
                debug!(id = %job.id(), pages = pages, "Fanned out PDF pages");
            }
        }

        let output = tempfile::Builder::new()
            .prefix("preview-")
            .suffix(".jpg")
            .tempfile()
            .map_err(|_| ErrorCode::CouldNotResizeImage)?;

        let args = convert_args(&file_type, input.path(), output.path(), page, width, height, density);
        run_tool("convert", args).await.map_err(|e| {
            warn!(id = %job.id(), error = %e, "Resize failed");
            ErrorCode::CouldNotResizeImage
        })?;

        let (image_width, image_height) = image_dimensions(output.path()).await.map_err(|e| {
            warn!(id = %job.id(), error = %e, "Could not read rendered dimensions");
            ErrorCode::CouldNotDetermineRenderSize
        })?;
        let file_size = tokio::fs::metadata(output.path())
            .await
            .map_err(|_| ErrorCode::CouldNotDetermineFileSize)?
            .len();

        self.ctx.upload(&job.asset.location, output.path()).await?;

        job.record(attrs::IMAGE_WIDTH, image_width);
        job.record(attrs::IMAGE_HEIGHT, image_height);
        job.record(attrs::FILE_SIZE, file_size);
        Ok(Outcome::Complete)
    }
}

/// Arguments for `convert`. PDFs render the requested page at the template
/// density; GIFs use their first frame.
fn convert_args(
    file_type: &str,
    input: &Path,
    output: &Path,
    page: u32,
    width: u32,
    height: u32,
    density: u32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut selected = input.as_os_str().to_owned();

    match file_type {
        "pdf" => {
            args.push("-density".into());
            args.push(density.to_string().into());
            selected.push(format!("[{}]", page));
        }
        "gif" => selected.push("[0]"),
        _ => {}
    }

    args.push(selected);
    args.push("-resize".into());
    args.push(format!("{}x{}", width, height).into());
    args.push("-background".into());
    args.push("white".into());
    args.push("-flatten".into());
    args.push(output.as_os_str().to_owned());
    args
}
