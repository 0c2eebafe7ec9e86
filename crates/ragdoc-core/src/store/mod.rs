//! Storage abstraction for ragdoc.
//!
//! [`VectorStore`] holds embedded documents keyed by content fingerprint;
//! [`MetadataStore`] holds the upload ledger. The app crate provides SQLite
//! implementations of both, and [`memory::InMemoryVectorStore`] backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, DocumentSelector, NewDocument, QueryHit, VectorRecord};

/// Whether an upsert created a record or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Content-addressed vector storage.
///
/// At most one record exists per fingerprint; upserting an existing
/// fingerprint replaces its vector, content, metadata and uri.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, record: &VectorRecord) -> Result<UpsertOutcome>;

    /// Records for the given fingerprints, in request order. Unknown
    /// fingerprints are skipped.
    async fn get(&self, fingerprints: &[String]) -> Result<Vec<VectorRecord>>;

    /// Up to `k` records nearest to `query` by cosine similarity, closest
    /// first. Ties break on fingerprint, ascending.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<QueryHit>>;

    async fn count(&self) -> Result<i64>;
}

/// Persistent upload ledger.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Record a new upload. Returns `false` without writing when a row with
    /// the same `doc_hash` already exists.
    async fn save_metadata(&self, doc: &NewDocument) -> Result<bool>;

    async fn count_metadata(&self) -> Result<i64>;

    /// One page of rows ordered by id. `page` is 1-based.
    async fn list_metadata(&self, page: u32, page_size: u32) -> Result<Vec<Document>>;

    /// Rows matching the selector, in selector order. Unknown keys are skipped.
    async fn get_metadata(&self, selector: &DocumentSelector) -> Result<Vec<Document>>;
}
