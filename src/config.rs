use anyhow::{Context, Result};
use ragdoc_core::prompt::{SamplingConfig, DEFAULT_HINT_HEADER, DEFAULT_HINT_INSTRUCTION};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub feeds_dir: PathBuf,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            collection: default_collection(),
        }
    }
}

fn default_max_results() -> usize {
    10
}
fn default_collection() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the backend. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Providers that need a model name and a declared dimension.
    fn needs_model(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama" | "local")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,
    /// Environment variable holding a bearer token. Unset means no auth header.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_hint_header")]
    pub hint_header: String,
    #[serde(default = "default_hint_instruction")]
    pub hint_instruction: String,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            endpoint: default_chat_endpoint(),
            api_key_env: None,
            top_k: default_top_k(),
            timeout_secs: default_chat_timeout_secs(),
            hint_header: default_hint_header(),
            hint_instruction: default_hint_instruction(),
            sampling: SamplingConfig::default(),
        }
    }
}

impl ChatConfig {
    pub fn completions_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }
}

fn default_chat_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_chat_endpoint() -> String {
    "/v1/chat/completions".to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_chat_timeout_secs() -> u64 {
    120
}
fn default_hint_header() -> String {
    DEFAULT_HINT_HEADER.to_string()
}
fn default_hint_instruction() -> String {
    DEFAULT_HINT_INSTRUCTION.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_tolerate")]
    pub tolerate_partial_failure: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            tolerate_partial_failure: default_tolerate(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_tolerate() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.dims.unwrap_or(0) == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.needs_model() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    if config.vector.max_results < 1 {
        anyhow::bail!("vector.max_results must be >= 1");
    }
    if config.chat.top_k < 1 || config.chat.top_k > config.vector.max_results {
        anyhow::bail!(
            "chat.top_k must be in [1, {}] (vector.max_results)",
            config.vector.max_results
        );
    }

    if config.ingest.concurrency < 1 {
        anyhow::bail!("ingest.concurrency must be >= 1");
    }
    if config.storage.max_file_bytes == 0 {
        anyhow::bail!("storage.max_file_bytes must be > 0");
    }

    Ok(())
}
