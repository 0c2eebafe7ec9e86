//! Prompt assembly for retrieval-augmented chat.
//!
//! Retrieved hits become a numbered hint block (`"1. <content>\n"`, ...)
//! that is wrapped in a header and an instruction and appended, together
//! with the user's question, as the final user turn of the conversation.

use serde::{Deserialize, Serialize};

use crate::models::QueryHit;

pub const DEFAULT_HINT_HEADER: &str = "Here is some related material:";
pub const DEFAULT_HINT_INSTRUCTION: &str =
    "Please answer the question based on the material above:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Fixed sampling parameters sent with every completion request.
///
/// Serialized flat into the request body next to `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub typical_p: f32,
    pub repeat_last_n: i32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub dry_multiplier: f32,
    pub dry_base: f32,
    pub dry_allowed_length: i32,
    pub dry_penalty_last_n: i32,
    pub xtc_probability: f32,
    pub xtc_threshold: f32,
    pub dynatemp_range: f32,
    pub dynatemp_exponent: f32,
    pub max_tokens: i32,
    pub cache_prompt: bool,
    pub samplers: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.05,
            typical_p: 1.0,
            repeat_last_n: 64,
            repeat_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            dry_multiplier: 0.0,
            dry_base: 1.75,
            dry_allowed_length: 2,
            dry_penalty_last_n: -1,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            dynatemp_range: 0.0,
            dynatemp_exponent: 1.0,
            max_tokens: -1,
            cache_prompt: true,
            samplers: "edkypmxt".into(),
        }
    }
}

/// Number hits from 1 in rank order, one per line.
pub fn format_hints(hits: &[QueryHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, hit.content));
    }
    out
}

/// Final user turn: the hint block wrapped in `header`/`instruction`, then
/// the question. With no hits the question is sent unchanged.
pub fn user_turn(hits: &[QueryHit], question: &str, header: &str, instruction: &str) -> String {
    if hits.is_empty() {
        return question.to_string();
    }
    format!(
        "{}\n{}\n\n{} {}",
        header,
        format_hints(hits),
        instruction,
        question
    )
}

/// Prior turns followed by the assembled user turn.
pub fn build_messages(
    prior: &[ChatMessage],
    hits: &[QueryHit],
    question: &str,
    header: &str,
    instruction: &str,
) -> Vec<ChatMessage> {
    let mut messages = prior.to_vec();
    messages.push(ChatMessage::user(user_turn(
        hits,
        question,
        header,
        instruction,
    )));
    messages
}
