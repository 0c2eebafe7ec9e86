//! Extraction plugins and the extension-keyed plugin registry.
//!
//! A [`DocumentPlugin`] turns a stored file into plain text plus one
//! embedding vector for the whole document. Routing is by file extension:
//! [`PluginRegistry::resolve`] normalizes the extension, looks up the
//! factory registered for it, and constructs the plugin once, bound to the
//! registry's embedding provider. The instance is cached for the life of
//! the registry.
//!
//! | Extensions | Plugin |
//! |------------|--------|
//! | `txt`, `md`, `json`, `csv` | [`text::TextPlugin`] |
//! | `pdf` | [`pdf::PdfPlugin`] |
//! | `docx`, `pptx`, `xlsx` | [`ooxml::OoxmlPlugin`] |
//!
//! Audio and image uploads pass validation but have no plugin, so parsing
//! them fails with [`Error::PluginNotFound`].

pub mod ooxml;
pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ragdoc_core::embedding::EmbeddingProvider;
use ragdoc_core::error::{Error, Result};
use ragdoc_core::sniff::normalize_extension;
use tokio::sync::OnceCell;
use tracing::debug;

/// Text and vector produced for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub embedding: Vec<f32>,
}

#[async_trait]
pub trait DocumentPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Extensions this plugin understands. Informational only.
    fn supported_formats(&self) -> &'static [&'static str];

    /// Independent signature check on the first bytes of a file.
    fn detect_by_header(&self, header: &[u8]) -> bool;

    /// Extract text and embed it. `Ok(None)` means the file holds no usable
    /// text and should be skipped rather than failed.
    async fn extract(&self, path: &Path) -> Result<Option<Extraction>>;
}

/// Builds a plugin bound to an embedding provider.
pub type PluginFactory = fn(&str, Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn DocumentPlugin>>;

static BUILTINS: &[(&str, PluginFactory)] = &[
    ("txt", text::create),
    ("md", text::create),
    ("json", text::create),
    ("csv", text::create),
    ("pdf", pdf::create),
    ("docx", ooxml::create),
    ("pptx", ooxml::create),
    ("xlsx", ooxml::create),
];

type Slot = Arc<OnceCell<Arc<dyn DocumentPlugin>>>;

pub struct PluginRegistry {
    embedder: Arc<dyn EmbeddingProvider>,
    factories: HashMap<String, PluginFactory>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl PluginRegistry {
    /// Empty registry; add factories with [`register`](Self::register).
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            factories: HashMap::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_builtins(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let mut registry = Self::new(embedder);
        for (ext, factory) in BUILTINS {
            registry.register(ext, *factory);
        }
        registry
    }

    pub fn register(&mut self, ext: &str, factory: PluginFactory) {
        self.factories.insert(normalize_extension(ext), factory);
    }

    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.factories.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Return the cached plugin for `ext`, constructing it on first use.
    ///
    /// Concurrent first resolutions of one extension construct exactly one
    /// instance. A failed construction is not cached.
    pub async fn resolve(&self, ext: &str) -> Result<Arc<dyn DocumentPlugin>> {
        let ext = normalize_extension(ext);
        let factory = *self
            .factories
            .get(&ext)
            .ok_or_else(|| Error::PluginNotFound(ext.clone()))?;

        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| Error::PluginInitFailed {
                    ext: ext.clone(),
                    reason: "plugin cache lock poisoned".into(),
                })?;
            Arc::clone(slots.entry(ext.clone()).or_default())
        };

        let plugin = slot
            .get_or_try_init(|| async {
                debug!(ext = %ext, "constructing extraction plugin");
                factory(&ext, Arc::clone(&self.embedder)).map_err(|e| match e {
                    Error::PluginInitFailed { .. } | Error::PermanentConfig(_) => e,
                    other => Error::PluginInitFailed {
                        ext: ext.clone(),
                        reason: other.to_string(),
                    },
                })
            })
            .await?;
        Ok(Arc::clone(plugin))
    }
}

/// Refuse to build a plugin when the provider cannot produce vectors. This
/// is a deployment problem, not a property of one file.
pub(crate) fn require_embedder(ext: &str, embedder: &Arc<dyn EmbeddingProvider>) -> Result<()> {
    if embedder.dims() == 0 {
        return Err(Error::PermanentConfig(format!(
            "cannot build {ext} plugin: embedding provider '{}' is disabled",
            embedder.model_name()
        )));
    }
    Ok(())
}

/// Embed extracted text, or report an empty extraction.
pub(crate) async fn embed_extracted(
    embedder: &dyn EmbeddingProvider,
    text: String,
) -> Result<Option<Extraction>> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return Ok(None);
    }
    let embedding = embedder.embed_query(&text).await?;
    Ok(Some(Extraction { text, embedding }))
}
