//! `LLMClient` trait: the model-call seam injected into
//! `AgenticLoop` and the streaming session, generalizing the other's
//! `src/llm/adapters` transport abstraction to a single async trait object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::ContentBlock;

/// A message as sent to the LLM — narrower than `ConversationMessage`
/// since only role + content blocks cross the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Length,
    StopSequence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LLMUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: LLMUsage,
}

/// One event of a streamed response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart { input_tokens: u64 },
    TextDelta { text: String },
    /// Non-text deltas (e.g. `input_json_delta`) are surfaced but ignored
    /// by the streaming session.
    InputJsonDelta { partial_json: String },
    MessageDelta { output_tokens: u64 },
    MessageStop,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMClientError {
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm overloaded (529)")]
    Overloaded,
    #[error("llm rate limited (429)")]
    RateLimited,
}

/// The LLM call seam consumed by `AgenticLoop` and the streaming session.
/// Implementors wrap a concrete HTTP/SDK client (cf. the other's
/// `llm/adapters/{openai,ollama,glm}.rs`).
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn create_message(&self, request: LLMRequest) -> Result<LLMResponse, LLMClientError>;

    /// Streaming variant; implementors invoke `on_event` once per wire
    /// event, in order, terminating with `MessageStop`. A callback rather
    /// than a returned stream keeps ordering serial by construction (cf.
    /// `SyncTransport::post_stream(..., on_line)`).
    async fn stream_message(
        &self,
        request: LLMRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<(), LLMClientError>;
}
