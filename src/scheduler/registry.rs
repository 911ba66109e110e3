//! Renderer constructors keyed by kind.
//!
//! The registry is plain data handed to [`super::RenderScheduler::start`].
//! Each worker calls its kind's factory once, so renderers may keep
//! per-worker state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::render::{RenderContext, Renderer};

/// Builds a renderer for one worker.
pub type RendererFactory = Arc<dyn Fn(&RenderContext) -> Arc<dyn Renderer> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RendererRegistry {
    factories: BTreeMap<String, RendererFactory>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `kind`, replacing an earlier registration.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&RenderContext) -> Arc<dyn Renderer> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Builder form of [`RendererRegistry::register`].
    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RenderContext) -> Arc<dyn Renderer> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&RendererFactory> {
        self.factories.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds in name order.
    pub fn kinds(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
