//! Downloading render inputs and uploading render outputs.
//!
//! # URL Forms
//!
//! - `local:///{path}`: relative to the configured base path
//! - `file:///{path}` or `/{path}`: read directly from the filesystem
//! - `http(s)://...`: fetched with `reqwest` (downloads only)
//! - `s3://{bucket}/{key}`: produced by [`Uploader::url`] for S3 deployments;
//!   this crate's uploader does not write to S3

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::assets::SourceAsset;
use crate::error::TransferError;
use crate::template::Template;

const LOCAL_SCHEME: &str = "local:///";
const FILE_SCHEME: &str = "file://";
const S3_SCHEME: &str = "s3://";

/// Fetches a render input into a temporary file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `url`. Fails per URL; callers try alternatives in order.
    async fn download(&self, url: &str, source: &SourceAsset)
        -> Result<NamedTempFile, TransferError>;
}

/// Stores render outputs and names their destinations.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, destination: &str, local_path: &Path) -> Result<(), TransferError>;

    /// Destination for rendering `source` with `template` at `page`.
    /// Deterministic for the same inputs.
    fn url(&self, source: &SourceAsset, template: &Template, page: u32) -> String;
}

/// Downloader for local, file and HTTP URLs.
pub struct DefaultDownloader {
    base_path: PathBuf,
    client: Client,
}

impl DefaultDownloader {
    /// # Arguments
    ///
    /// * `base_path` - Root that `local:///` URLs resolve against
    /// * `http_timeout` - Whole-request timeout for HTTP fetches
    pub fn new(base_path: impl Into<PathBuf>, http_timeout: Duration) -> Self {
        Self {
            base_path: base_path.into(),
            client: Client::builder()
                .timeout(http_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn temp_file(source: &SourceAsset) -> Result<NamedTempFile, TransferError> {
        // Conversion tools pick the input format from the extension.
        let suffix = source
            .file_type()
            .map(|t| format!(".{}", t))
            .unwrap_or_default();
        Ok(tempfile::Builder::new()
            .prefix("preview-")
            .suffix(&suffix)
            .tempfile()?)
    }

    async fn copy_from(
        &self,
        path: &Path,
        url: &str,
        source: &SourceAsset,
    ) -> Result<NamedTempFile, TransferError> {
        let file = Self::temp_file(source)?;
        tokio::fs::copy(path, file.path())
            .await
            .map_err(|e| TransferError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(file)
    }

    async fn fetch(&self, url: &str, source: &SourceAsset) -> Result<NamedTempFile, TransferError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", "preview/1.0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let body = response.bytes().await?;
        let file = Self::temp_file(source)?;
        tokio::fs::write(file.path(), &body).await?;
        Ok(file)
    }
}

#[async_trait]
impl Downloader for DefaultDownloader {
    async fn download(
        &self,
        url: &str,
        source: &SourceAsset,
    ) -> Result<NamedTempFile, TransferError> {
        debug!(url = %url, source_id = %source.id, "Downloading render input");

        if let Some(relative) = url.strip_prefix(LOCAL_SCHEME) {
            let path = self.base_path.join(relative);
            self.copy_from(&path, url, source).await
        } else if let Some(path) = url.strip_prefix(FILE_SCHEME) {
            self.copy_from(Path::new(path), url, source).await
        } else if url.starts_with('/') {
            self.copy_from(Path::new(url), url, source).await
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch(url, source).await
        } else {
            Err(TransferError::UnsupportedUrl(url.to_string()))
        }
    }
}

/// Where [`LocalUploader::url`] points new assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlStyle {
    Local,
    S3 { bucket: String },
}

/// Uploader that writes `local:///` destinations under a base directory.
pub struct LocalUploader {
    base_path: PathBuf,
    style: UrlStyle,
}

impl LocalUploader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            style: UrlStyle::Local,
        }
    }

    /// Names destinations in `bucket` instead of under the base path.
    pub fn with_s3_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.style = UrlStyle::S3 {
            bucket: bucket.into(),
        };
        self
    }

    /// Filesystem path for a `local:///` destination.
    pub fn local_path(&self, destination: &str) -> Option<PathBuf> {
        destination
            .strip_prefix(LOCAL_SCHEME)
            .map(|relative| self.base_path.join(relative))
    }
}

#[async_trait]
impl Uploader for LocalUploader {
    async fn upload(&self, destination: &str, local_path: &Path) -> Result<(), TransferError> {
        let Some(target) = self.local_path(destination) else {
            return Err(TransferError::UnsupportedUrl(destination.to_string()));
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| TransferError::UploadFailed {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;

        debug!(destination = %destination, path = %target.display(), "Uploaded render output");
        Ok(())
    }

    fn url(&self, source: &SourceAsset, template: &Template, page: u32) -> String {
        if let Some(location) = template.force_s3_location() {
            return format!("{}{}/{}", S3_SCHEME, location, source.id);
        }

        let size = template.placeholder_size().unwrap_or("original");
        match (&self.style, template.is_pdf_output()) {
            (UrlStyle::Local, true) => format!("{}{}/pdf", LOCAL_SCHEME, source.id),
            (UrlStyle::Local, false) => {
                format!("{}{}/{}/{}", LOCAL_SCHEME, source.id, size, page)
            }
            (UrlStyle::S3 { bucket }, true) => format!("{}{}/{}-pdf", S3_SCHEME, bucket, source.id),
            (UrlStyle::S3 { bucket }, false) => {
                format!("{}{}/{}-{}-{}", S3_SCHEME, bucket, source.id, size, page)
            }
        }
    }
}
