//! In-memory [`VectorStore`] implementation for testing.
//!
//! Uses a `HashMap` behind `std::sync::RwLock` for thread safety.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{UpsertOutcome, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{QueryHit, VectorRecord};

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Store("in-memory store lock poisoned".into())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: &VectorRecord) -> Result<UpsertOutcome> {
        let mut records = self.records.write().map_err(poisoned)?;
        let outcome = match records.insert(record.fingerprint.clone(), record.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        Ok(outcome)
    }

    async fn get(&self, fingerprints: &[String]) -> Result<Vec<VectorRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(fingerprints
            .iter()
            .filter_map(|fp| records.get(fp).cloned())
            .collect())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut hits: Vec<QueryHit> = records
            .values()
            .map(|r| QueryHit {
                rank: 0,
                fingerprint: r.fingerprint.clone(),
                embedding: r.embedding.clone(),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                uri: r.uri.clone(),
                score: cosine_similarity(query, &r.embedding),
            })
            .collect();
        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.records.read().map_err(poisoned)?.len() as i64)
    }
}

/// Order hits by score descending, then fingerprint ascending, keep the
/// first `k` and number them from 1.
pub fn rank_hits(hits: &mut Vec<QueryHit>, k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    hits.truncate(k);
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordMetadata;

    fn record(fp: &str, v: Vec<f32>, content: &str) -> VectorRecord {
        VectorRecord {
            fingerprint: fp.to_string(),
            embedding: v,
            content: content.to_string(),
            metadata: RecordMetadata {
                doc_name: format!("{fp}.txt"),
                posix: format!("/tmp/{fp}.txt"),
            },
            uri: format!("file:///tmp/{fp}.txt"),
        }
    }

    #[tokio::test]
    async fn upsert_reports_insert_then_update() {
        let store = InMemoryVectorStore::new();
        let r = record("aa", vec![1.0, 0.0], "first");
        assert_eq!(store.upsert(&r).await.unwrap(), UpsertOutcome::Inserted);
        let r2 = record("aa", vec![0.0, 1.0], "second");
        assert_eq!(store.upsert(&r2).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count().await.unwrap(), 1);
        let got = store.get(&["aa".to_string()]).await.unwrap();
        assert_eq!(got[0].content, "second");
    }

    #[tokio::test]
    async fn get_keeps_request_order_and_skips_missing() {
        let store = InMemoryVectorStore::new();
        store.upsert(&record("a", vec![1.0], "a")).await.unwrap();
        store.upsert(&record("b", vec![1.0], "b")).await.unwrap();
        let got = store
            .get(&["b".to_string(), "zz".to_string(), "a".to_string()])
            .await
            .unwrap();
        let fps: Vec<_> = got.iter().map(|r| r.fingerprint.as_str()).collect();
        assert_eq!(fps, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn nearest_orders_by_score_then_fingerprint() {
        let store = InMemoryVectorStore::new();
        store.upsert(&record("c", vec![0.0, 1.0], "far")).await.unwrap();
        store.upsert(&record("b", vec![1.0, 0.0], "tie")).await.unwrap();
        store.upsert(&record("a", vec![2.0, 0.0], "tie")).await.unwrap();
        let hits = store.nearest(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].fingerprint, "a");
        assert_eq!(hits[1].fingerprint, "b");
        assert_eq!((hits[0].rank, hits[1].rank), (1, 2));
    }
}
