//! Error types shared across the preview service.
//!
//! Subsystem-local errors live next to their subsystem (`StoreError` in
//! `storage`, `PoolError` in `scheduler::worker_pool`, `ConfigError` in
//! `config`). This module holds the crate-wide ones:
//! - `ErrorCode`: stable machine-readable failure codes recorded on assets
//! - Scheduler admission errors
//! - Template catalog errors
//! - Download/upload transfer errors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::storage::StoreError;

/// Stable failure codes embedded in `failed:<code>` statuses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoDownloadUrlsWork,
    NoSourceAssetForId,
    CouldNotResizeImage,
    CouldNotUploadAsset,
    CouldNotConvertDocument,
    CouldNotDetermineFileSize,
    CouldNotDetermineRenderSize,
    CouldNotDetermineDensity,
    CouldNotDetermineFileType,
    CouldNotDeterminePageCount,
    NoTemplatesFoundForId,
    NotImplemented,
    UnknownError,
    RenderingTimedOut,
    NoRenderersSupportFileType,
    UploaderDoesNotSupportUrl,
    CouldNotSubmitTranscode,
    /// A code outside the built-in set, kept verbatim.
    Other(String),
}

impl ErrorCode {
    /// Returns the code string as persisted.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoDownloadUrlsWork => "no-download-urls-work",
            Self::NoSourceAssetForId => "no-source-asset-for-id",
            Self::CouldNotResizeImage => "could-not-resize-image",
            Self::CouldNotUploadAsset => "could-not-upload-asset",
            Self::CouldNotConvertDocument => "could-not-convert-document",
            Self::CouldNotDetermineFileSize => "could-not-determine-file-size",
            Self::CouldNotDetermineRenderSize => "could-not-determine-render-size",
            Self::CouldNotDetermineDensity => "could-not-determine-density",
            Self::CouldNotDetermineFileType => "could-not-determine-file-type",
            Self::CouldNotDeterminePageCount => "could-not-determine-page-count",
            Self::NoTemplatesFoundForId => "no-templates-found-for-id",
            Self::NotImplemented => "not-implemented",
            Self::UnknownError => "unknown-error",
            Self::RenderingTimedOut => "rendering-timed-out",
            Self::NoRenderersSupportFileType => "no-renderers-support-file-type",
            Self::UploaderDoesNotSupportUrl => "uploader-does-not-support-url",
            Self::CouldNotSubmitTranscode => "could-not-submit-transcode",
            Self::Other(code) => code,
        }
    }

    const KNOWN: [ErrorCode; 17] = [
        Self::NoDownloadUrlsWork,
        Self::NoSourceAssetForId,
        Self::CouldNotResizeImage,
        Self::CouldNotUploadAsset,
        Self::CouldNotConvertDocument,
        Self::CouldNotDetermineFileSize,
        Self::CouldNotDetermineRenderSize,
        Self::CouldNotDetermineDensity,
        Self::CouldNotDetermineFileType,
        Self::CouldNotDeterminePageCount,
        Self::NoTemplatesFoundForId,
        Self::NotImplemented,
        Self::UnknownError,
        Self::RenderingTimedOut,
        Self::NoRenderersSupportFileType,
        Self::UploaderDoesNotSupportUrl,
        Self::CouldNotSubmitTranscode,
    ];
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = Self::KNOWN
            .iter()
            .find(|known| known.as_str() == s)
            .cloned()
            .unwrap_or_else(|| Self::Other(s.to_string()));
        Ok(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(code) => code,
            Err(never) => match never {},
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(s.as_str()))
    }
}

/// Errors surfaced to callers of the scheduler's admission operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No renderers support file type '{0}'")]
    UnsupportedFileType(String),

    #[error("No templates found for ids: {0:?}")]
    TemplatesNotFound(Vec<String>),

    #[error("Unknown render agent '{0}'")]
    UnknownRenderAgent(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
}

impl SchedulerError {
    /// Maps an admission failure onto the code a caller would record.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedFileType(_) => ErrorCode::NoRenderersSupportFileType,
            Self::TemplatesNotFound(_) => ErrorCode::NoTemplatesFoundForId,
            _ => ErrorCode::UnknownError,
        }
    }
}

/// Errors that can occur during template catalog operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error("Duplicate template ID '{0}' found during loading")]
    DuplicateTemplateId(String),

    #[error("Failed to parse template file '{path}': {message}")]
    ParseError { path: String, message: String },

    #[error("Missing required field '{field}' in template '{template}'")]
    MissingRequiredField { template: String, field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by downloaders and uploaders.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedUrl(String),

    #[error("Download of '{url}' failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Upload to '{destination}' failed: {reason}")]
    UploadFailed { destination: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Code recorded when an upload fails with this error.
    pub fn upload_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedUrl(_) => ErrorCode::UploaderDoesNotSupportUrl,
            _ => ErrorCode::CouldNotUploadAsset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trips_known_codes() {
        for code in ErrorCode::KNOWN.iter() {
            let parsed: ErrorCode = code.as_str().into();
            assert_eq!(&parsed, code);
        }
    }

    #[test]
    fn test_error_code_keeps_unknown_codes() {
        let code = ErrorCode::from("tool-exploded");
        assert_eq!(code, ErrorCode::Other("tool-exploded".to_string()));
        assert_eq!(code.to_string(), "tool-exploded");
    }

    #[test]
    fn test_error_code_serde() {
        let json = serde_json::to_string(&ErrorCode::NoDownloadUrlsWork).unwrap();
        assert_eq!(json, "\"no-download-urls-work\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::NoDownloadUrlsWork);
    }

    #[test]
    fn test_scheduler_error_codes() {
        let err = SchedulerError::UnsupportedFileType("xyz".to_string());
        assert_eq!(err.code(), ErrorCode::NoRenderersSupportFileType);
        assert!(err.to_string().contains("xyz"));

        let err = SchedulerError::TemplatesNotFound(vec!["t1".to_string()]);
        assert_eq!(err.code(), ErrorCode::NoTemplatesFoundForId);
    }

    #[test]
    fn test_transfer_error_upload_code() {
        let err = TransferError::UnsupportedUrl("s3://bucket/key".to_string());
        assert_eq!(err.upload_code(), ErrorCode::UploaderDoesNotSupportUrl);

        let err = TransferError::UploadFailed {
            destination: "local:///a".to_string(),
            reason: "disk full".to_string(),
        };
        assert_eq!(err.upload_code(), ErrorCode::CouldNotUploadAsset);
    }
}
