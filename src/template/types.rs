//! Render template definitions.

use serde::{Deserialize, Serialize};

use crate::assets::Attributes;

/// Built-in renderer kind names.
pub mod kinds {
    pub const IMAGE_MAGICK: &str = "imageMagickRenderAgent";
    pub const DOCUMENT: &str = "documentRenderAgent";
    pub const VIDEO: &str = "videoRenderAgent";
}

/// Template attribute keys.
pub mod template_attrs {
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const OUTPUT: &str = "output";
    pub const DENSITY: &str = "density";
    pub const PLACEHOLDER_SIZE: &str = "placeholderSize";
    pub const FORCE_S3_LOCATION: &str = "forceS3Location";
    pub const NOTIFICATION_URL: &str = "zencoderNotificationUrl";
}

/// Describes how to render one preview of a source asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    /// Renderer kind that executes this template.
    pub render_agent: String,
    /// Dispatch group; waiting work is claimed per group.
    pub group: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Template {
    pub fn new(
        id: impl Into<String>,
        render_agent: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            render_agent: render_agent.into(),
            group: group.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.set(key, value);
        self
    }

    pub fn width(&self) -> Option<u32> {
        self.attributes.parse(template_attrs::WIDTH)
    }

    pub fn height(&self) -> Option<u32> {
        self.attributes.parse(template_attrs::HEIGHT)
    }

    pub fn density(&self) -> Option<u32> {
        self.attributes.parse(template_attrs::DENSITY)
    }

    pub fn output(&self) -> Option<&str> {
        self.attributes.first(template_attrs::OUTPUT)
    }

    pub fn placeholder_size(&self) -> Option<&str> {
        self.attributes.first(template_attrs::PLACEHOLDER_SIZE)
    }

    pub fn force_s3_location(&self) -> Option<&str> {
        self.attributes
            .first(template_attrs::FORCE_S3_LOCATION)
            .filter(|v| !v.is_empty())
    }

    pub fn notification_url(&self) -> Option<&str> {
        self.attributes.first(template_attrs::NOTIFICATION_URL)
    }

    /// True when the template produces a whole-document PDF rather than a page image.
    pub fn is_pdf_output(&self) -> bool {
        self.output() == Some("pdf")
    }
}
