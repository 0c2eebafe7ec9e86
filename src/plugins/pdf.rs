//! PDF text via `pdf-extract`, run on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ragdoc_core::embedding::EmbeddingProvider;
use ragdoc_core::error::{Error, Result};

use super::{embed_extracted, require_embedder, DocumentPlugin, Extraction};

const PDF_MAGIC: &[u8] = b"%PDF-";

pub struct PdfPlugin {
    embedder: Arc<dyn EmbeddingProvider>,
}

pub fn create(ext: &str, embedder: Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn DocumentPlugin>> {
    require_embedder(ext, &embedder)?;
    Ok(Arc::new(PdfPlugin { embedder }))
}

#[async_trait]
impl DocumentPlugin for PdfPlugin {
    fn name(&self) -> &str {
        "pdf"
    }

    fn supported_formats(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn detect_by_header(&self, header: &[u8]) -> bool {
        header.starts_with(PDF_MAGIC)
    }

    async fn extract(&self, path: &Path) -> Result<Option<Extraction>> {
        let bytes = tokio::fs::read(path).await?;
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| Error::Extraction(format!("pdf extraction aborted: {e}")))?
            .map_err(|e| Error::Extraction(format!("pdf: {e}")))?;
        embed_extracted(self.embedder.as_ref(), text).await
    }
}
