//! LibreOffice document renderer.
//!
//! Converts an office document to PDF, uploads the PDF to the asset's
//! location and records it as the source's `pdf` form. Page 0 of that PDF
//! is then queued for every legacy image template; the image renderer fans
//! out the rest.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::assets::{attrs, id_types, Attributes, SourceAsset};
use crate::error::ErrorCode;

use super::process::{convert_to_pdf, pdf_page_count};
use super::{Outcome, RenderContext, RenderJob, Renderer};

pub struct DocumentRenderer {
    ctx: RenderContext,
}

impl DocumentRenderer {
    pub fn new(ctx: RenderContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Renderer for DocumentRenderer {
    async fn render(&self, job: &mut RenderJob) -> Result<Outcome, ErrorCode> {
        let source = self.ctx.load_source(&job.asset).await?;
        let input = self.ctx.download_any(&source).await?;

        let workdir = tempfile::Builder::new()
            .prefix("preview-doc-")
            .tempdir()
            .map_err(|_| ErrorCode::CouldNotConvertDocument)?;
        let pdf = convert_to_pdf(input.path(), workdir.path())
            .await
            .map_err(|e| {
                warn!(id = %job.id(), error = %e, "Document conversion failed");
                ErrorCode::CouldNotConvertDocument
            })?;
        if !pdf.exists() {
            warn!(id = %job.id(), path = %pdf.display(), "Converter produced no PDF");
            return Err(ErrorCode::CouldNotConvertDocument);
        }

        let pages = pdf_page_count(&pdf).await.map_err(|e| {
            warn!(id = %job.id(), error = %e, "Could not count PDF pages");
            ErrorCode::CouldNotDeterminePageCount
        })?;
        let size = tokio::fs::metadata(&pdf)
            .await
            .map_err(|_| ErrorCode::CouldNotDetermineFileSize)?
            .len();

        self.ctx.upload(&job.asset.location, &pdf).await?;

        let pdf_source = SourceAsset::new(source.id.clone(), id_types::PDF).with_attributes(
            Attributes::new()
                .with(attrs::SOURCE, &job.asset.location)
                .with(attrs::TYPE, "pdf")
                .with(attrs::SIZE, size)
                .with(attrs::PAGES, pages),
        );
        self.ctx.store().store_source(&pdf_source).await.map_err(|e| {
            warn!(id = %job.id(), error = %e, "Could not store PDF source");
            ErrorCode::UnknownError
        })?;

        let legacy_ids = self.ctx.admission.policy().legacy_template_ids().to_vec();
        let templates = self
            .ctx
            .catalog()
            .find_by_ids(&legacy_ids)
            .await
            .map_err(|_| ErrorCode::NoTemplatesFoundForId)?;
        let derived = self
            .ctx
            .admission
            .create_derived_work(&pdf_source, &templates, 0, 1)
            .await
            .map_err(|e| {
                warn!(id = %job.id(), error = %e, "Could not queue PDF previews");
                e.code()
            })?;

        info!(
            id = %job.id(),
            source_id = %source.id,
            pages = pages,
            derived = derived.len(),
            "Converted document to PDF"
        );

        job.record(attrs::FILE_SIZE, size);
        job.record(attrs::PAGES, pages);
        Ok(Outcome::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::Fixture;
    use crate::template::{kinds, DOCUMENT_TEMPLATE_ID};

    #[tokio::test]
    async fn test_missing_source_fails() {
        let fixture = Fixture::new(kinds::DOCUMENT);
        let mut job = fixture
            .job("local:///report.docx", "docx", DOCUMENT_TEMPLATE_ID)
            .await;
        job.asset.source_type = id_types::PDF.to_string();

        let renderer = DocumentRenderer::new(fixture.ctx.clone());
        assert_eq!(
            renderer.render(&mut job).await.unwrap_err(),
            ErrorCode::NoSourceAssetForId
        );
    }

    #[tokio::test]
    async fn test_unconvertible_input_fails_without_pdf_source() {
        let fixture = Fixture::new(kinds::DOCUMENT);
        std::fs::create_dir_all(fixture.input_path("")).unwrap();
        std::fs::write(fixture.input_path("report.docx"), b"").unwrap();
        let mut job = fixture
            .job("local:///report.docx", "docx", DOCUMENT_TEMPLATE_ID)
            .await;

        let renderer = DocumentRenderer::new(fixture.ctx.clone());
        let err = renderer.render(&mut job).await.unwrap_err();
        assert!(matches!(
            err,
            ErrorCode::CouldNotConvertDocument | ErrorCode::CouldNotDeterminePageCount
        ));

        let forms = fixture.ctx.store().find_source_by_id("src-1").await.unwrap();
        assert!(forms.iter().all(|f| f.id_type != id_types::PDF));
    }
}
