//! Service wiring.
//!
//! [`App`] is built once from a loaded [`Config`] and shared by the CLI and
//! the HTTP server. Every component receives the config or the pieces it
//! needs through its constructor.

use std::sync::Arc;

use anyhow::Result;
use ragdoc_core::embedding::EmbeddingProvider;
use ragdoc_core::index::VectorIndex;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::ingest::DocumentService;
use crate::migrate;
use crate::plugins::PluginRegistry;
use crate::retrieval::RetrievalService;
use crate::sqlite_store::{SqliteMetadataStore, SqliteVectorStore};

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub documents: DocumentService,
    pub retrieval: RetrievalService,
}

impl App {
    /// Connect, migrate, and build every service from `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Self::with_embedder(config, embedder).await
    }

    /// Like [`open`](Self::open) with a caller-supplied embedding provider.
    pub async fn with_embedder(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let config = Arc::new(config);

        let metadata = Arc::new(SqliteMetadataStore::new(pool.clone()));
        let vectors = Arc::new(SqliteVectorStore::new(
            pool.clone(),
            config.vector.collection.clone(),
        ));
        let index = VectorIndex::new(vectors, Arc::clone(&embedder), config.vector.max_results);
        let plugins = Arc::new(PluginRegistry::with_builtins(Arc::clone(&embedder)));

        info!(
            provider = %config.embedding.provider,
            model = embedder.model_name(),
            dims = embedder.dims(),
            plugins = ?plugins.extensions(),
            "services ready"
        );

        let documents =
            DocumentService::new(Arc::clone(&config), metadata, index.clone(), plugins);
        let retrieval = RetrievalService::new(Arc::clone(&config), index)?;

        Ok(Self {
            config,
            pool,
            documents,
            retrieval,
        })
    }
}
