//! Retrieval-augmented chat.
//!
//! [`RetrievalService::answer`] queries the vector index with the question,
//! turns the top hits into a numbered hint block, and sends the conversation
//! to an OpenAI-style chat completion endpoint with `stream: true`. The
//! streamed body is decoded frame by frame and the deltas are concatenated.
//!
//! Dropping the returned future drops the response body, which closes the
//! backend connection.

use std::sync::Arc;
use std::time::Duration;

use ragdoc_core::error::{Error, Result};
use ragdoc_core::index::VectorIndex;
use ragdoc_core::prompt::{build_messages, ChatMessage, SamplingConfig};
use ragdoc_core::stream::StreamAssembler;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(flatten)]
    sampling: &'a SamplingConfig,
}

#[derive(Clone)]
pub struct RetrievalService {
    config: Arc<Config>,
    index: VectorIndex,
    client: reqwest::Client,
}

impl RetrievalService {
    pub fn new(config: Arc<Config>, index: VectorIndex) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.chat.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            index,
            client,
        })
    }

    /// Answer `question` using retrieved context, continuing `prior`.
    pub async fn answer(&self, question: &str, prior: &[ChatMessage]) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidRequest("question is empty".into()));
        }
        let chat = &self.config.chat;

        let hits = self.index.query(question, chat.top_k).await?;
        debug!(hits = hits.len(), "retrieved context");
        let messages = build_messages(
            prior,
            &hits,
            question,
            &chat.hint_header,
            &chat.hint_instruction,
        );

        let body = CompletionRequest {
            messages: &messages,
            stream: true,
            sampling: &chat.sampling,
        };
        let mut req = self.client.post(chat.completions_url()).json(&body);
        if let Some(key) = chat
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
        {
            req = req.bearer_auth(key);
        }

        let idle = Duration::from_secs(chat.timeout_secs);
        let mut response = tokio::time::timeout(idle, req.send())
            .await
            .map_err(|_| Error::TransientBackend("completion request timed out".into()))?
            .map_err(|e| Error::TransientBackend(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 | 500..=599 => {
                    Error::TransientBackend(format!("completion backend {status}: {text}"))
                }
                401 | 403 => Error::PermanentConfig(format!(
                    "completion backend rejected credentials ({status})"
                )),
                _ => Error::Backend(format!("completion backend {status}: {text}")),
            });
        }

        let mut assembler = StreamAssembler::new();
        loop {
            let chunk = tokio::time::timeout(idle, response.chunk())
                .await
                .map_err(|_| Error::TransientBackend("completion stream stalled".into()))?
                .map_err(|e| Error::TransientBackend(format!("completion stream failed: {e}")))?;
            match chunk {
                Some(bytes) => {
                    if assembler.feed(&bytes) {
                        break;
                    }
                }
                None => break,
            }
        }

        let outcome = assembler.finish();
        if outcome.skipped > 0 {
            warn!(skipped = outcome.skipped, "completion stream had malformed frames");
        }
        info!(
            chars = outcome.text.len(),
            terminated = outcome.terminated,
            "completion received"
        );
        Ok(outcome.text)
    }
}
