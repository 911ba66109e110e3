//! Template catalog lookup.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use async_trait::async_trait;

use crate::error::TemplateError;

use super::types::{kinds, template_attrs as ta, Template};

/// Dispatch group shared by the legacy image templates.
pub const LEGACY_IMAGE_GROUP: &str = "4C96";
/// Dispatch group of the document-to-PDF template.
pub const DOCUMENT_GROUP: &str = "A907";
/// Dispatch group of the video streaming template.
pub const VIDEO_GROUP: &str = "7A96";

pub const JUMBO_TEMPLATE_ID: &str = "04a2c710-8872-4c88-9c75-a67175d3a8e7";
pub const LARGE_TEMPLATE_ID: &str = "2eee7c27-75e2-4682-9920-9a4e14caa433";
pub const MEDIUM_TEMPLATE_ID: &str = "a89a6a0d-51d9-4d99-b278-0c5dfc538984";
pub const SMALL_TEMPLATE_ID: &str = "eaa7be0e-354f-482c-ac75-75cbdafecb6e";
pub const DOCUMENT_TEMPLATE_ID: &str = "9B17C6CE-7B09-4FD5-92AD-D85DD218D6D7";
pub const VIDEO_TEMPLATE_ID: &str = "4128966B-9F69-4E56-AD5C-1FDB3C24F910";

/// Ids of the image templates every image-like file renders with.
pub const LEGACY_TEMPLATE_IDS: [&str; 4] = [
    JUMBO_TEMPLATE_ID,
    LARGE_TEMPLATE_ID,
    MEDIUM_TEMPLATE_ID,
    SMALL_TEMPLATE_ID,
];

/// Read access to templates.
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    /// Returns templates for `ids` in request order.
    ///
    /// Fails with `TemplateError::NotFound` naming the first unknown id.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Template>, TemplateError>;

    /// Returns every template executed by the renderer kind `kind`.
    async fn find_by_render_service(&self, kind: &str) -> Result<Vec<Template>, TemplateError>;

    /// Returns a single template.
    async fn find_by_id(&self, id: &str) -> Result<Template, TemplateError> {
        let mut found = self.find_by_ids(&[id.to_string()]).await?;
        found
            .pop()
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    /// Returns the distinct dispatch groups routed to `kind`.
    async fn groups_for_render_service(&self, kind: &str) -> Result<Vec<String>, TemplateError> {
        let groups: BTreeSet<String> = self
            .find_by_render_service(kind)
            .await?
            .into_iter()
            .map(|t| t.group)
            .collect();
        Ok(groups.into_iter().collect())
    }
}

/// The templates shipped with the service.
pub fn default_templates() -> Vec<Template> {
    let image = |id: &str, width: u32, height: u32, size: &str| {
        Template::new(id, kinds::IMAGE_MAGICK, LEGACY_IMAGE_GROUP)
            .with_attribute(ta::WIDTH, width)
            .with_attribute(ta::HEIGHT, height)
            .with_attribute(ta::DENSITY, 144)
            .with_attribute(ta::OUTPUT, "jpg")
            .with_attribute(ta::PLACEHOLDER_SIZE, size)
    };

    vec![
        image(JUMBO_TEMPLATE_ID, 1040, 780, "jumbo"),
        image(LARGE_TEMPLATE_ID, 520, 390, "large"),
        image(MEDIUM_TEMPLATE_ID, 500, 376, "medium"),
        image(SMALL_TEMPLATE_ID, 250, 188, "small"),
        Template::new(DOCUMENT_TEMPLATE_ID, kinds::DOCUMENT, DOCUMENT_GROUP)
            .with_attribute(ta::OUTPUT, "pdf"),
        Template::new(VIDEO_TEMPLATE_ID, kinds::VIDEO, VIDEO_GROUP)
            .with_attribute(ta::OUTPUT, "m3u8"),
    ]
}

/// Immutable in-memory catalog built once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateCatalog {
    templates: HashMap<String, Template>,
    /// Insertion order, so listings are stable.
    order: Vec<String>,
}

impl StaticTemplateCatalog {
    /// Builds a catalog, rejecting duplicate or incomplete templates.
    pub fn new(templates: Vec<Template>) -> Result<Self, TemplateError> {
        let mut catalog = Self::default();
        for template in templates {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    /// Catalog with the built-in templates followed by `extra`.
    pub fn with_defaults(extra: Vec<Template>) -> Result<Self, TemplateError> {
        let mut templates = default_templates();
        templates.extend(extra);
        Self::new(templates)
    }

    fn insert(&mut self, template: Template) -> Result<(), TemplateError> {
        validate(&template)?;
        if self.templates.contains_key(&template.id) {
            return Err(TemplateError::DuplicateTemplateId(template.id));
        }
        self.order.push(template.id.clone());
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Loads every `.yaml`/`.yml` file in `dir` (non-recursive) as one template.
    pub fn load_directory<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, TemplateError> {
        let mut count = 0;

        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_dir() {
                continue;
            }

            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let content = fs::read_to_string(&path)?;
            let template: Template =
                serde_yaml::from_str(&content).map_err(|e| TemplateError::ParseError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            self.insert(template)?;
            count += 1;
        }

        Ok(count)
    }

    /// All templates in insertion order.
    pub fn all(&self) -> Vec<&Template> {
        self.order
            .iter()
            .filter_map(|id| self.templates.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn validate(template: &Template) -> Result<(), TemplateError> {
    let missing = |field: &str| TemplateError::MissingRequiredField {
        template: template.id.clone(),
        field: field.to_string(),
    };
    if template.id.trim().is_empty() {
        return Err(missing("id"));
    }
    if template.render_agent.trim().is_empty() {
        return Err(missing("renderAgent"));
    }
    if template.group.trim().is_empty() {
        return Err(missing("group"));
    }
    Ok(())
}

#[async_trait]
impl TemplateCatalog for StaticTemplateCatalog {
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Template>, TemplateError> {
        ids.iter()
            .map(|id| {
                self.templates
                    .get(id)
                    .cloned()
                    .ok_or_else(|| TemplateError::NotFound(id.clone()))
            })
            .collect()
    }

    async fn find_by_render_service(&self, kind: &str) -> Result<Vec<Template>, TemplateError> {
        Ok(self
            .all()
            .into_iter()
            .filter(|t| t.render_agent == kind)
            .cloned()
            .collect())
    }
}
