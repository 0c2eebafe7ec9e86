//! Document ingestion.
//!
//! Upload: validate → fingerprint → store under
//! `feeds_dir/YYYY-MM-DD/<fingerprint>/<name>` → record metadata (skipped
//! when the fingerprint is already known). Files with different content never
//! share a path, so a ledger row always points at the bytes it was hashed from.
//! Parse: re-check the stored bytes against the fingerprint → resolve a
//! plugin per extension → extract text and vector → upsert into the vector
//! index keyed by fingerprint.
//!
//! Batch operations report per-document outcomes. Validation, extraction,
//! and transient backend failures count against one document; a permanent
//! configuration error abandons the whole batch.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone, Utc};
use ragdoc_core::error::{Error, Result};
use ragdoc_core::hash::{digest_bytes, digest_file};
use ragdoc_core::index::VectorIndex;
use ragdoc_core::models::{
    Document, DocumentSelector, NewDocument, QueryHit, RecordMetadata, VectorRecord,
};
use ragdoc_core::sniff::{extension_of, FormatSniffer};
use ragdoc_core::store::{MetadataStore, UpsertOutcome};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::plugins::PluginRegistry;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// One file received from a client.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadDetail {
    pub doc_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_hash: Option<String>,
    pub doc_size: u64,
    /// False when the content was already recorded under an earlier upload.
    pub new_document: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub total: usize,
    pub success: usize,
    pub fail: usize,
    pub fail_docs: Vec<String>,
    pub details: Vec<UploadDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub doc_id: i64,
    pub doc_name: String,
    pub dest_dir: String,
    pub doc_hash: String,
    pub doc_size: i64,
    pub create_time: String,
}

impl From<Document> for DocumentView {
    fn from(doc: Document) -> Self {
        let create_time = Local
            .timestamp_opt(doc.create_time, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| doc.create_time.to_string());
        Self {
            doc_id: doc.id,
            doc_name: doc.doc_name,
            dest_dir: doc.dest_dir,
            doc_hash: doc.doc_hash,
            doc_size: doc.doc_size,
            create_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentListing {
    pub documents: Vec<DocumentView>,
    pub total: i64,
    pub page: u32,
    #[serde(rename = "page_count")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Inserted,
    Updated,
    /// Extraction produced no text.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseDetail {
    pub doc_id: i64,
    pub doc_name: String,
    pub doc_hash: String,
    pub status: ParseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseReport {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub fail: usize,
    pub details: Vec<ParseDetail>,
}

#[derive(Clone)]
pub struct DocumentService {
    config: Arc<Config>,
    sniffer: FormatSniffer,
    metadata: Arc<dyn MetadataStore>,
    index: VectorIndex,
    plugins: Arc<PluginRegistry>,
}

impl DocumentService {
    pub fn new(
        config: Arc<Config>,
        metadata: Arc<dyn MetadataStore>,
        index: VectorIndex,
        plugins: Arc<PluginRegistry>,
    ) -> Self {
        let sniffer = FormatSniffer::new().with_max_bytes(config.storage.max_file_bytes);
        Self {
            config,
            sniffer,
            metadata,
            index,
            plugins,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Store every file that passes validation. Never fails as a whole;
    /// rejected files are listed in the report.
    pub async fn upload_documents(&self, files: Vec<UploadFile>) -> UploadReport {
        let mut details = Vec::with_capacity(files.len());
        let mut fail_docs = Vec::new();

        for file in files {
            let size = file.data.len() as u64;
            match self.upload_one(&file).await {
                Ok(detail) => details.push(detail),
                Err(e) => {
                    warn!(doc_name = %file.file_name, error = %e, "upload rejected");
                    fail_docs.push(file.file_name.clone());
                    details.push(UploadDetail {
                        doc_name: file.file_name,
                        doc_hash: None,
                        doc_size: size,
                        new_document: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let fail = fail_docs.len();
        UploadReport {
            total: details.len(),
            success: details.len() - fail,
            fail,
            fail_docs,
            details,
        }
    }

    async fn upload_one(&self, file: &UploadFile) -> Result<UploadDetail> {
        let name = sanitize_file_name(&file.file_name)?;
        self.sniffer
            .validate(&name, &mut Cursor::new(file.data.as_slice()))?;
        let doc_hash = digest_bytes(&file.data);

        let dest_dir = dated_dir(&self.config.storage.feeds_dir).join(&doc_hash);
        tokio::fs::create_dir_all(&dest_dir).await?;
        let dest_dir = tokio::fs::canonicalize(&dest_dir).await?;
        let dest = dest_dir.join(&name);
        // Same directory and name means same bytes.
        let already_stored = tokio::fs::try_exists(&dest).await?;
        if !already_stored {
            tokio::fs::write(&dest, &file.data).await?;
        }

        let saved = self
            .metadata
            .save_metadata(&NewDocument {
                dest_dir: dest_dir.to_string_lossy().into_owned(),
                doc_name: name.clone(),
                doc_hash: doc_hash.clone(),
                doc_size: file.data.len() as i64,
                create_time: Utc::now().timestamp(),
            })
            .await;
        let new_document = match saved {
            Ok(inserted) => inserted,
            Err(e) => {
                if !already_stored {
                    if let Err(rm) = tokio::fs::remove_file(&dest).await {
                        warn!(path = %dest.display(), error = %rm, "could not remove unrecorded upload");
                    }
                }
                return Err(e);
            }
        };

        info!(doc_name = %name, doc_hash = %doc_hash, new_document, "document uploaded");
        Ok(UploadDetail {
            doc_name: name,
            doc_hash: Some(doc_hash),
            doc_size: file.data.len() as u64,
            new_document,
            error: None,
        })
    }

    /// One page of the upload ledger. `page` is 1-based.
    pub async fn list_documents(&self, page: u32, page_size: u32) -> Result<DocumentListing> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let total = self.metadata.count_metadata().await?;

        let offset = i64::from(page - 1) * i64::from(page_size);
        let documents = if total <= offset {
            Vec::new()
        } else {
            self.metadata
                .list_metadata(page, page_size)
                .await?
                .into_iter()
                .map(DocumentView::from)
                .collect()
        };

        Ok(DocumentListing {
            documents,
            total,
            page,
            page_size,
        })
    }

    /// Extract, embed, and index the selected documents.
    ///
    /// Every selected document must exist in the ledger and on disk before
    /// any is processed; otherwise the call fails with [`Error::NotFound`].
    pub async fn parse_documents(&self, selector: &DocumentSelector) -> Result<ParseReport> {
        if selector.is_empty() {
            return Err(Error::InvalidRequest("no documents selected".into()));
        }
        if self.index.embedder().dims() == 0 {
            return Err(Error::PermanentConfig(format!(
                "embedding provider '{}' is disabled; nothing can be indexed",
                self.index.embedder().model_name()
            )));
        }

        let docs = self.metadata.get_metadata(selector).await?;
        let missing = missing_keys(selector, &docs);
        if !missing.is_empty() {
            return Err(Error::NotFound(format!(
                "unknown documents: {}",
                missing.join(", ")
            )));
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(docs.len());
        for doc in docs {
            if !seen.insert(doc.doc_hash.clone()) {
                continue;
            }
            let path = doc.full_path();
            match tokio::fs::canonicalize(&path).await {
                Ok(abs) => targets.push((doc, abs)),
                Err(_) => {
                    return Err(Error::NotFound(format!(
                        "file not found: {}",
                        path.display()
                    )))
                }
            }
        }

        let permits = Arc::new(Semaphore::new(self.config.ingest.concurrency));
        let mut tasks = JoinSet::new();
        for (slot, (doc, path)) in targets.iter().cloned().enumerate() {
            let service = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (slot, service.parse_one(&doc, &path).await)
            });
        }

        let mut outcomes: Vec<Option<Result<Option<UpsertOutcome>>>> =
            (0..targets.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (slot, outcome) =
                joined.map_err(|e| Error::Extraction(format!("parse task failed: {e}")))?;
            match outcome {
                Err(e) if e.aborts_batch() || !self.config.ingest.tolerate_partial_failure => {
                    warn!(error = %e, "aborting parse batch");
                    tasks.abort_all();
                    return Err(e);
                }
                other => outcomes[slot] = Some(other),
            }
        }

        let mut report = ParseReport {
            total: targets.len(),
            success: 0,
            skipped: 0,
            fail: 0,
            details: Vec::with_capacity(targets.len()),
        };
        for ((doc, _), outcome) in targets.into_iter().zip(outcomes) {
            let (status, error) = match outcome {
                Some(Ok(Some(UpsertOutcome::Inserted))) => (ParseStatus::Inserted, None),
                Some(Ok(Some(UpsertOutcome::Updated))) => (ParseStatus::Updated, None),
                Some(Ok(None)) => (ParseStatus::Skipped, None),
                Some(Err(e)) => {
                    warn!(doc_hash = %doc.doc_hash, error = %e, "document parse failed");
                    (ParseStatus::Failed, Some(e.to_string()))
                }
                None => (ParseStatus::Failed, Some("not processed".to_string())),
            };
            match status {
                ParseStatus::Inserted | ParseStatus::Updated => report.success += 1,
                ParseStatus::Skipped => report.skipped += 1,
                ParseStatus::Failed => report.fail += 1,
            }
            report.details.push(ParseDetail {
                doc_id: doc.id,
                doc_name: doc.doc_name,
                doc_hash: doc.doc_hash,
                status,
                error,
            });
        }

        info!(
            total = report.total,
            success = report.success,
            skipped = report.skipped,
            fail = report.fail,
            "parse batch finished"
        );
        Ok(report)
    }

    /// `Ok(None)` when the plugin found no text to index.
    async fn parse_one(&self, doc: &Document, path: &Path) -> Result<Option<UpsertOutcome>> {
        let stored_hash = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || digest_file(&path))
                .await
                .map_err(|e| Error::Extraction(format!("hash task failed: {e}")))??
        };
        if stored_hash != doc.doc_hash {
            return Err(Error::Extraction(format!(
                "{} no longer matches fingerprint {}",
                path.display(),
                doc.doc_hash
            )));
        }

        let ext = extension_of(&doc.doc_name).unwrap_or_default();
        let plugin = self.plugins.resolve(&ext).await?;
        let Some(extraction) = plugin.extract(path).await? else {
            info!(doc_hash = %doc.doc_hash, ext = %ext, "no text extracted, skipping");
            return Ok(None);
        };

        let uri = reqwest::Url::from_file_path(path)
            .map_err(|_| Error::InvalidRequest(format!("not an absolute path: {}", path.display())))?
            .to_string();
        let record = VectorRecord {
            fingerprint: doc.doc_hash.clone(),
            embedding: extraction.embedding,
            content: extraction.text,
            metadata: RecordMetadata {
                doc_name: doc.doc_name.clone(),
                posix: path.to_string_lossy().replace('\\', "/"),
            },
            uri,
        };
        self.index.upsert(&record).await.map(Some)
    }

    /// Stored vector records for the given fingerprints, in request order.
    pub async fn get_vectors(&self, hashes: &[String]) -> Result<Vec<VectorRecord>> {
        if hashes.is_empty() {
            return Err(Error::InvalidRequest("doc_hashes is empty".into()));
        }
        self.index.get(hashes).await
    }

    /// Records closest to `text`, up to the configured maximum.
    pub async fn search_similar(&self, text: &str) -> Result<Vec<QueryHit>> {
        self.index.query(text, self.index.max_results()).await
    }
}

/// Keep only the final path component of a client-supplied name.
fn sanitize_file_name(raw: &str) -> Result<String> {
    let normalized = raw.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidRequest(format!("invalid file name: {raw:?}")));
    }
    Ok(name.to_string())
}

fn dated_dir(feeds_dir: &Path) -> PathBuf {
    feeds_dir.join(Local::now().format("%Y-%m-%d").to_string())
}

fn missing_keys(selector: &DocumentSelector, found: &[Document]) -> Vec<String> {
    match selector {
        DocumentSelector::Ids(ids) => ids
            .iter()
            .filter(|id| !found.iter().any(|d| d.id == **id))
            .map(|id| id.to_string())
            .collect(),
        DocumentSelector::Hashes(hashes) => hashes
            .iter()
            .filter(|h| !found.iter().any(|d| &d.doc_hash == *h))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragdoc_core::embedding::HashProvider;
    use ragdoc_core::store::memory::InMemoryVectorStore;

    /// Ledger whose writes always fail.
    struct BrokenLedger;

    #[async_trait]
    impl MetadataStore for BrokenLedger {
        async fn save_metadata(&self, _doc: &NewDocument) -> Result<bool> {
            Err(Error::Store("database is locked".into()))
        }
        async fn count_metadata(&self) -> Result<i64> {
            Ok(0)
        }
        async fn list_metadata(&self, _page: u32, _page_size: u32) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }
        async fn get_metadata(&self, _selector: &DocumentSelector) -> Result<Vec<Document>> {
            Ok(Vec::new())
        }
    }

    fn service_with(metadata: Arc<dyn MetadataStore>, feeds: &Path) -> DocumentService {
        let src = format!(
            "[db]\npath = \"{0}/db.sqlite\"\n\n[storage]\nfeeds_dir = \"{0}\"\n\n[server]\nbind = \"127.0.0.1:0\"\n",
            feeds.display()
        );
        let config = Arc::new(crate::config::parse_config(&src).unwrap());
        let embedder: Arc<dyn ragdoc_core::embedding::EmbeddingProvider> =
            Arc::new(HashProvider::new(16));
        let index = VectorIndex::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::clone(&embedder),
            10,
        );
        let plugins = Arc::new(PluginRegistry::with_builtins(embedder));
        DocumentService::new(config, metadata, index, plugins)
    }

    #[tokio::test]
    async fn failed_ledger_write_leaves_no_file_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_with(Arc::new(BrokenLedger), tmp.path());

        let report = service
            .upload_documents(vec![UploadFile {
                file_name: "notes.txt".into(),
                data: b"kubernetes pods".to_vec(),
            }])
            .await;
        assert_eq!(report.fail, 1);
        assert!(report.details[0]
            .error
            .as_deref()
            .unwrap()
            .contains("database is locked"));

        let stored = walkdir::WalkDir::new(tmp.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(stored, 0);
    }

    #[test]
    fn file_names_are_reduced_to_last_component() {
        assert_eq!(sanitize_file_name("a.pdf").unwrap(), "a.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd.txt").unwrap(), "passwd.txt");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\notes.md").unwrap(), "notes.md");
        assert!(sanitize_file_name("dir/").is_err());
        assert!(sanitize_file_name("..").is_err());
    }

    #[test]
    fn dated_dir_has_day_component() {
        let dir = dated_dir(Path::new("/feeds"));
        let day = dir.file_name().unwrap().to_str().unwrap();
        assert_eq!(day.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok());
    }

    #[test]
    fn missing_keys_reports_unknown_ids() {
        let doc = Document {
            id: 1,
            dest_dir: "/d".into(),
            doc_name: "a.txt".into(),
            doc_hash: "h1".into(),
            doc_size: 1,
            create_time: 0,
        };
        let sel = DocumentSelector::Ids(vec![1, 7]);
        assert_eq!(missing_keys(&sel, &[doc.clone()]), vec!["7".to_string()]);
        let sel = DocumentSelector::Hashes(vec!["h1".into()]);
        assert!(missing_keys(&sel, &[doc]).is_empty());
    }
}
