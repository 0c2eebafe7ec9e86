//! SQLite-backed store implementations.
//!
//! [`SqliteMetadataStore`] keeps the upload ledger in `documents`;
//! [`SqliteVectorStore`] keeps one row per fingerprint in `vectors`, scoped
//! by collection name. Nearest-neighbor search is a brute-force cosine scan.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragdoc_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragdoc_core::error::{Error, Result};
use ragdoc_core::models::{
    Document, DocumentSelector, NewDocument, QueryHit, RecordMetadata, VectorRecord,
};
use ragdoc_core::store::memory::rank_hits;
use ragdoc_core::store::{MetadataStore, UpsertOutcome, VectorStore};

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        dest_dir: row.get("dest_dir"),
        doc_name: row.get("doc_name"),
        doc_hash: row.get("doc_hash"),
        doc_size: row.get("doc_size"),
        create_time: row.get("create_time"),
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn save_metadata(&self, doc: &NewDocument) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (dest_dir, doc_name, doc_hash, doc_size, create_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(doc_hash) DO NOTHING
            "#,
        )
        .bind(&doc.dest_dir)
        .bind(&doc.doc_name)
        .bind(&doc.doc_hash)
        .bind(doc.doc_size)
        .bind(doc.create_time)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_metadata(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn list_metadata(&self, page: u32, page_size: u32) -> Result<Vec<Document>> {
        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
        let rows = sqlx::query(
            "SELECT id, dest_dir, doc_name, doc_hash, doc_size, create_time
             FROM documents ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn get_metadata(&self, selector: &DocumentSelector) -> Result<Vec<Document>> {
        let mut docs = Vec::with_capacity(selector.len());
        match selector {
            DocumentSelector::Ids(ids) => {
                for id in ids {
                    let row = sqlx::query(
                        "SELECT id, dest_dir, doc_name, doc_hash, doc_size, create_time
                         FROM documents WHERE id = ?",
                    )
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_err)?;
                    docs.extend(row.as_ref().map(row_to_document));
                }
            }
            DocumentSelector::Hashes(hashes) => {
                for hash in hashes {
                    let row = sqlx::query(
                        "SELECT id, dest_dir, doc_name, doc_hash, doc_size, create_time
                         FROM documents WHERE doc_hash = ?",
                    )
                    .bind(hash)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_err)?;
                    docs.extend(row.as_ref().map(row_to_document));
                }
            }
        }
        Ok(docs)
    }
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }
}

fn row_to_record(row: &SqliteRow) -> VectorRecord {
    let blob: Vec<u8> = row.get("embedding");
    VectorRecord {
        fingerprint: row.get("fingerprint"),
        embedding: blob_to_vec(&blob),
        content: row.get("content"),
        metadata: RecordMetadata {
            doc_name: row.get("doc_name"),
            posix: row.get("posix"),
        },
        uri: row.get("uri"),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, record: &VectorRecord) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vectors WHERE collection = ? AND fingerprint = ?",
        )
        .bind(&self.collection)
        .bind(&record.fingerprint)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO vectors (collection, fingerprint, embedding, dims, content,
                                 doc_name, posix, uri, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, fingerprint) DO UPDATE SET
                embedding = excluded.embedding,
                dims = excluded.dims,
                content = excluded.content,
                doc_name = excluded.doc_name,
                posix = excluded.posix,
                uri = excluded.uri,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(&record.fingerprint)
        .bind(vec_to_blob(&record.embedding))
        .bind(record.embedding.len() as i64)
        .bind(&record.content)
        .bind(&record.metadata.doc_name)
        .bind(&record.metadata.posix)
        .bind(&record.uri)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;

        Ok(if existing > 0 {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn get(&self, fingerprints: &[String]) -> Result<Vec<VectorRecord>> {
        let mut records = Vec::with_capacity(fingerprints.len());
        for fp in fingerprints {
            let row = sqlx::query(
                "SELECT fingerprint, embedding, content, doc_name, posix, uri
                 FROM vectors WHERE collection = ? AND fingerprint = ?",
            )
            .bind(&self.collection)
            .bind(fp)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
            records.extend(row.as_ref().map(row_to_record));
        }
        Ok(records)
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        let rows = sqlx::query(
            "SELECT fingerprint, embedding, content, doc_name, posix, uri
             FROM vectors WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut hits: Vec<QueryHit> = rows
            .iter()
            .map(|row| {
                let record = row_to_record(row);
                let score = cosine_similarity(query, &record.embedding);
                QueryHit {
                    rank: 0,
                    fingerprint: record.fingerprint,
                    embedding: record.embedding,
                    content: record.content,
                    metadata: record.metadata,
                    uri: record.uri,
                    score,
                }
            })
            .collect();
        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}
