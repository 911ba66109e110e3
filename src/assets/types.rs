//! Source and generated asset records.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::AssetStatus;

/// Well-known source asset id types.
pub mod id_types {
    /// The file as submitted by the caller.
    pub const ORIGIN: &str = "origin";
    /// A PDF produced from a document.
    pub const PDF: &str = "pdf";
}

/// Well-known attribute keys.
pub mod attrs {
    pub const SOURCE: &str = "source";
    pub const TYPE: &str = "type";
    pub const SIZE: &str = "size";
    pub const PAGES: &str = "pages";
    pub const PAGE: &str = "page";
    pub const IMAGE_WIDTH: &str = "imageWidth";
    pub const IMAGE_HEIGHT: &str = "imageHeight";
    pub const FILE_SIZE: &str = "fileSize";
    pub const STREAMING_URL: &str = "streamingUrl";
}

/// Key to multi-value attribute list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Vec<String>>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values for `key`, empty when absent.
    pub fn get(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value for `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).first().map(String::as_str)
    }

    /// Parses the first value for `key`.
    pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.first(key).and_then(|v| v.trim().parse().ok())
    }

    /// Replaces all values for `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), vec![value.to_string()]);
    }

    /// Replaces all values for `key`.
    pub fn set_all(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.0.insert(key.into(), values);
    }

    /// Appends a value to `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.entry(key.into()).or_default().push(value.to_string());
    }

    /// Builder form of [`Attributes::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Overlays `other` onto `self`; keys present in `other` win.
    pub fn merge(&mut self, other: &Attributes) {
        for (key, values) in &other.0 {
            self.0.insert(key.clone(), values.clone());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Vec<String>)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One materialized form of a submitted file.
///
/// Identified by `(id, id_type)`: a document, the PDF rendered from it and
/// so on all share `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub id: String,
    pub id_type: String,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
}

impl SourceAsset {
    pub fn new(id: impl Into<String>, id_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            id_type: id_type.into(),
            attributes: Attributes::new(),
            created_at: Utc::now(),
        }
    }

    /// Creates the `origin` form for a caller-submitted file.
    pub fn origin(id: impl Into<String>) -> Self {
        Self::new(id, id_types::ORIGIN)
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.merge(&attributes);
        self
    }

    /// Declared download locations, in preference order.
    pub fn source_urls(&self) -> &[String] {
        self.attributes.get(attrs::SOURCE)
    }

    /// Declared file type, lowercased.
    pub fn file_type(&self) -> Option<String> {
        self.attributes.first(attrs::TYPE).map(str::to_lowercase)
    }

    pub fn size(&self) -> Option<u64> {
        self.attributes.parse(attrs::SIZE)
    }

    pub fn pages(&self) -> Option<u32> {
        self.attributes.parse(attrs::PAGES)
    }
}

/// A unit of render work and its permanent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub id: String,
    pub source_id: String,
    pub source_type: String,
    pub template_id: String,
    pub location: String,
    pub status: AssetStatus,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeneratedAsset {
    /// Creates a waiting asset rendering `source` with `template_id`.
    pub fn new(
        source: &SourceAsset,
        template_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source.id.clone(),
            source_type: source.id_type.clone(),
            template_id: template_id.into(),
            location: location.into(),
            status: AssetStatus::Waiting,
            attributes: Attributes::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks this asset as rendering one page of a multi-page source.
    pub fn with_page(mut self, page: u32) -> Self {
        self.attributes.set(attrs::PAGE, page);
        self
    }

    /// The page this asset renders; page 0 when unset.
    pub fn page(&self) -> u32 {
        self.attributes.parse(attrs::PAGE).unwrap_or(0)
    }

    /// Sets the status and bumps `updated_at`.
    pub fn set_status(&mut self, status: AssetStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
