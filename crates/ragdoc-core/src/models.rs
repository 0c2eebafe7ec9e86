//! Data models shared across the ingestion and retrieval pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata row for an uploaded file.
///
/// One row exists per distinct content fingerprint. A second upload of the
/// same bytes under another name lands on disk but does not add a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    /// Directory the file was stored in (`<feeds_dir>/YYYY-MM-DD`).
    pub dest_dir: String,
    pub doc_name: String,
    /// Hex SHA-256 of the file bytes.
    pub doc_hash: String,
    pub doc_size: i64,
    /// Unix timestamp (seconds) of the upload.
    pub create_time: i64,
}

impl Document {
    pub fn full_path(&self) -> PathBuf {
        PathBuf::from(&self.dest_dir).join(&self.doc_name)
    }
}

/// A document about to be recorded; `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub dest_dir: String,
    pub doc_name: String,
    pub doc_hash: String,
    pub doc_size: i64,
    pub create_time: i64,
}

/// Metadata attached to every vector record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub doc_name: String,
    /// Absolute POSIX-style path of the source file.
    pub posix: String,
}

/// One indexed document, keyed by its content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub fingerprint: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: RecordMetadata,
    /// `file://` URI of the source file.
    pub uri: String,
}

/// A vector record returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    /// 1-based position in the result list.
    pub rank: usize,
    pub fingerprint: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: RecordMetadata,
    pub uri: String,
    /// Cosine similarity against the query vector, higher is closer.
    pub score: f32,
}

/// Which documents a parse request targets.
///
/// When a request carries both ids and hashes, ids win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSelector {
    Ids(Vec<i64>),
    Hashes(Vec<String>),
}

impl DocumentSelector {
    pub fn from_parts(ids: Vec<i64>, hashes: Vec<String>) -> Option<Self> {
        if !ids.is_empty() {
            Some(Self::Ids(ids))
        } else if !hashes.is_empty() {
            Some(Self::Hashes(hashes))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Ids(v) => v.len(),
            Self::Hashes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
