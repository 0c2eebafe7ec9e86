//! Content-addressed vector index.
//!
//! [`VectorIndex`] binds a [`VectorStore`] to the deployment's
//! [`EmbeddingProvider`]. It enforces the fixed vector dimension on every
//! write, bounds query size by the configured maximum, and embeds query text
//! before searching.

use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::{ensure_dims, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{QueryHit, VectorRecord};
use crate::store::{UpsertOutcome, VectorStore};

#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_results: usize,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_results: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            max_results: max_results.max(1),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Insert or replace the record stored under `record.fingerprint`.
    ///
    /// Writing the same record twice leaves the store as writing it once.
    pub async fn upsert(&self, record: &VectorRecord) -> Result<UpsertOutcome> {
        ensure_dims(&record.embedding, self.embedder.dims())?;
        let outcome = self.store.upsert(record).await?;
        match outcome {
            UpsertOutcome::Inserted => info!(doc_hash = %record.fingerprint, "vector record inserted"),
            UpsertOutcome::Updated => info!(doc_hash = %record.fingerprint, "vector record updated"),
        }
        Ok(outcome)
    }

    pub async fn get(&self, fingerprints: &[String]) -> Result<Vec<VectorRecord>> {
        self.store.get(fingerprints).await
    }

    /// Embed `text` and return up to `k` closest records, closest first.
    ///
    /// `k` is capped at `max_results`; `k == 0` yields no hits.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("query text is empty".into()));
        }
        let k = k.min(self.max_results);
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(text).await?;
        ensure_dims(&vector, self.embedder.dims())?;
        let hits = self.store.nearest(&vector, k).await?;
        debug!(k, returned = hits.len(), "nearest-neighbor query");
        Ok(hits)
    }
}
