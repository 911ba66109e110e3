//! Asset data model.
//!
//! A `SourceAsset` is a file submitted for preview (or a form derived from
//! one, like the PDF of a document). A `GeneratedAsset` is one render of a
//! source with a template, and doubles as the unit of scheduled work.

pub mod status;
pub mod types;

pub use status::{AssetStatus, ParseStatusError};
pub use types::{attrs, id_types, Attributes, GeneratedAsset, SourceAsset};
