//! Plain and structured text files. The file body is the document text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ragdoc_core::embedding::EmbeddingProvider;
use ragdoc_core::error::Result;

use super::{embed_extracted, require_embedder, DocumentPlugin, Extraction};

const UTF8_BOM: &str = "\u{feff}";

pub struct TextPlugin {
    embedder: Arc<dyn EmbeddingProvider>,
}

pub fn create(ext: &str, embedder: Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn DocumentPlugin>> {
    require_embedder(ext, &embedder)?;
    Ok(Arc::new(TextPlugin { embedder }))
}

#[async_trait]
impl DocumentPlugin for TextPlugin {
    fn name(&self) -> &str {
        "text"
    }

    fn supported_formats(&self) -> &'static [&'static str] {
        &["txt", "md", "json", "csv"]
    }

    /// Accepts any header that is valid UTF-8, allowing a character cut
    /// off at the end of the slice.
    fn detect_by_header(&self, header: &[u8]) -> bool {
        match std::str::from_utf8(header) {
            Ok(_) => true,
            Err(e) => e.error_len().is_none(),
        }
    }

    async fn extract(&self, path: &Path) -> Result<Option<Extraction>> {
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(&text).to_string();
        embed_extracted(self.embedder.as_ref(), text).await
    }
}
