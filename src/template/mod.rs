//! Render templates and the catalog that resolves them.
//!
//! A template names the renderer kind that executes it, a dispatch group
//! used to claim waiting work in batches, and free-form attributes
//! (size, density, output format, placeholder class).
//!
//! # Example
//!
//! ```ignore
//! use preview::template::{StaticTemplateCatalog, TemplateCatalog, kinds};
//!
//! let catalog = StaticTemplateCatalog::with_defaults(Vec::new())?;
//! let image_templates = catalog.find_by_render_service(kinds::IMAGE_MAGICK).await?;
//! ```

pub mod catalog;
pub mod types;

pub use catalog::{
    default_templates, StaticTemplateCatalog, TemplateCatalog, DOCUMENT_GROUP,
    DOCUMENT_TEMPLATE_ID, JUMBO_TEMPLATE_ID, LARGE_TEMPLATE_ID, LEGACY_IMAGE_GROUP,
    LEGACY_TEMPLATE_IDS, MEDIUM_TEMPLATE_ID, SMALL_TEMPLATE_ID, VIDEO_GROUP, VIDEO_TEMPLATE_ID,
};
pub use types::{kinds, template_attrs, Template};
