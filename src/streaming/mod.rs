//! Streaming LLM: token-level streaming for ANSWER/PLAN turns, grounded
//! on `llm/chat.rs`'s single-adapter streaming entrypoint and
//! `llm/chat_events.rs::ChatEvent::Chunk`, generalized into a
//! model-agnostic session over the `LLMClient` seam.

use crate::conversation::ContentBlock;
use crate::error::CoreResult;
use crate::event::{EventBus, EventPayload, EventType, Mode, Stage};
use crate::external::{LLMClient, LLMMessage, LLMRequest, StreamEvent};

/// One chunk handed to the caller's `on_chunk` callback.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

/// Outcome of a completed (or failed) streaming turn.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Resolves a short alias (`sonnet`, `haiku`, `opus`) to its canonical
/// model id. Fully-qualified ids pass through unchanged. Returns the
/// resolved id plus `true` if a fallback to the default model occurred
/// because the alias was unrecognized.
fn resolve_model(requested: &str) -> (String, bool) {
    match requested {
        "sonnet" => ("claude-sonnet-4-5".to_string(), false),
        "haiku" => ("claude-haiku-4-5".to_string(), false),
        "opus" => ("claude-opus-4-1".to_string(), false),
        other if other.starts_with("claude-") => (other.to_string(), false),
        _unknown => (DEFAULT_MODEL.to_string(), true),
    }
}

/// Runs one ANSWER/PLAN streaming turn end to end.
pub struct StreamingSession<'a> {
    pub client: &'a dyn LLMClient,
    pub bus: &'a EventBus,
}

impl<'a> StreamingSession<'a> {
    pub fn new(client: &'a dyn LLMClient, bus: &'a EventBus) -> Self {
        Self { client, bus }
    }

    pub async fn run(
        &self,
        task_id: &str,
        mode: Mode,
        stage: Stage,
        requested_model: &str,
        system_context: Option<&str>,
        messages: Vec<LLMMessage>,
        mut on_chunk: impl FnMut(StreamChunk) + Send,
    ) -> CoreResult<StreamOutcome> {
        let (model, fallback_used) = resolve_model(requested_model);
        if fallback_used {
            self.bus.emit(
                task_id,
                EventType::ModelFallbackUsed,
                mode,
                stage,
                EventPayload::new()
                    .insert("requested_model", requested_model)
                    .insert("reason", "unsupported_model"),
                vec![],
                None,
            )?;
        }

        let message_count = messages.len();
        let has_context = system_context.is_some();
        let multi_turn = message_count > 1;

        let start_event = self.bus.emit(
            task_id,
            EventType::ToolStart,
            mode,
            stage,
            EventPayload::new()
                .insert("tool", "llm_answer")
                .insert("multi_turn", multi_turn)
                .insert("message_count", message_count as u64)
                .insert("has_context", has_context),
            vec![],
            None,
        )?;

        let request = LLMRequest {
            model,
            system: system_context.map(|s| s.to_string()),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        let mut text = String::new();
        let mut input_tokens: u64 = 0;
        let mut output_tokens: u64 = 0;

        let mut on_event = |event: StreamEvent| match event {
            StreamEvent::MessageStart { input_tokens: n } => {
                input_tokens = n;
            }
            StreamEvent::TextDelta { text: delta } => {
                text.push_str(&delta);
                let _ = self.bus.emit(
                    task_id,
                    EventType::StreamDelta,
                    mode,
                    stage,
                    EventPayload::new().insert("delta", delta.clone()),
                    vec![],
                    Some(start_event.event_id.clone()),
                );
                on_chunk(StreamChunk { delta, done: false });
            }
            StreamEvent::InputJsonDelta { .. } => {}
            StreamEvent::MessageDelta { output_tokens: n } => {
                output_tokens = n;
            }
            StreamEvent::MessageStop => {}
        };

        let result = self.client.stream_message(request, &mut on_event).await;

        match result {
            Ok(()) => {
                let total_tokens = input_tokens + output_tokens;
                self.bus.emit(
                    task_id,
                    EventType::StreamComplete,
                    mode,
                    stage,
                    EventPayload::new().insert("total_tokens", total_tokens),
                    vec![],
                    Some(start_event.event_id.clone()),
                )?;
                on_chunk(StreamChunk {
                    delta: String::new(),
                    done: true,
                });
                self.bus.emit(
                    task_id,
                    EventType::ToolEnd,
                    mode,
                    stage,
                    EventPayload::new()
                        .insert("tool", "llm_answer")
                        .insert("status", "completed")
                        .insert(
                            "usage",
                            serde_json::json!({
                                "input_tokens": input_tokens,
                                "output_tokens": output_tokens,
                            }),
                        ),
                    vec![],
                    Some(start_event.event_id.clone()),
                )?;
                Ok(StreamOutcome {
                    text,
                    input_tokens,
                    output_tokens,
                })
            }
            Err(e) => {
                self.bus.emit(
                    task_id,
                    EventType::ToolEnd,
                    mode,
                    stage,
                    EventPayload::new()
                        .insert("tool", "llm_answer")
                        .insert("status", "failed")
                        .insert("error", e.to_string()),
                    vec![],
                    Some(start_event.event_id.clone()),
                )?;
                Err(crate::error::CoreError::LlmError(e.to_string()))
            }
        }
    }
}

/// Convenience constructor for a single-turn user message list, used by
/// callers that don't maintain their own `ConversationHistory`.
pub fn single_user_turn(text: impl Into<String>) -> Vec<LLMMessage> {
    vec![LLMMessage {
        role: "user".to_string(),
        content: vec![ContentBlock::Text { text: text.into() }],
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::external::{LLMClientError, LLMResponse};
    use crate::ids::{FixedClock, SequentialIds};
    use async_trait::async_trait;
    use tempfile::tempdir;

    fn bus(dir: &std::path::Path) -> EventBus {
        let store = EventStore::with_providers(
            dir.join("events.jsonl"),
            Box::new(FixedClock::new(1)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();
        EventBus::new(store)
    }

    struct ScriptedStreamClient {
        deltas: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl LLMClient for ScriptedStreamClient {
        async fn create_message(&self, _request: LLMRequest) -> Result<LLMResponse, LLMClientError> {
            unimplemented!("streaming tests only exercise stream_message")
        }

        async fn stream_message(
            &self,
            _request: LLMRequest,
            on_event: &mut (dyn FnMut(StreamEvent) + Send),
        ) -> Result<(), LLMClientError> {
            if self.fail {
                return Err(LLMClientError::Overloaded);
            }
            on_event(StreamEvent::MessageStart { input_tokens: 12 });
            for chunk in &self.deltas {
                on_event(StreamEvent::TextDelta {
                    text: chunk.to_string(),
                });
            }
            on_event(StreamEvent::InputJsonDelta {
                partial_json: "{}".to_string(),
            });
            on_event(StreamEvent::MessageDelta { output_tokens: 7 });
            on_event(StreamEvent::MessageStop);
            Ok(())
        }
    }

    #[tokio::test]
    async fn streams_deltas_then_done_chunk() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let client = ScriptedStreamClient {
            deltas: vec!["hel", "lo"],
            fail: false,
        };
        let session = StreamingSession::new(&client, &bus);

        let mut received = Vec::new();
        let outcome = session
            .run(
                "t1",
                Mode::Answer,
                Stage::None,
                "sonnet",
                None,
                single_user_turn("hi"),
                |chunk| received.push(chunk),
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.input_tokens, 12);
        assert_eq!(outcome.output_tokens, 7);
        assert_eq!(received.len(), 3);
        assert!(!received[0].done);
        assert!(received.last().unwrap().done);
        assert_eq!(received.last().unwrap().delta, "");
    }

    #[tokio::test]
    async fn unknown_alias_falls_back_and_emits_event() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let client = ScriptedStreamClient {
            deltas: vec!["ok"],
            fail: false,
        };
        let session = StreamingSession::new(&client, &bus);

        session
            .run(
                "t1",
                Mode::Answer,
                Stage::None,
                "not-a-real-model",
                None,
                single_user_turn("hi"),
                |_| {},
            )
            .await
            .unwrap();

        let events = bus.store().read_all().unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::ModelFallbackUsed));
    }

    #[tokio::test]
    async fn known_fully_qualified_id_passes_through() {
        let (resolved, fallback) = resolve_model("claude-opus-4-1-special");
        assert_eq!(resolved, "claude-opus-4-1-special");
        assert!(!fallback);
    }

    #[tokio::test]
    async fn error_emits_failed_tool_end_and_propagates() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let client = ScriptedStreamClient {
            deltas: vec![],
            fail: true,
        };
        let session = StreamingSession::new(&client, &bus);

        let result = session
            .run(
                "t1",
                Mode::Answer,
                Stage::None,
                "sonnet",
                None,
                single_user_turn("hi"),
                |_| {},
            )
            .await;

        assert!(result.is_err());
        let events = bus.store().read_all().unwrap();
        let tool_end = events
            .iter()
            .find(|e| e.event_type == EventType::ToolEnd)
            .unwrap();
        assert_eq!(
            tool_end.payload.get("status").unwrap(),
            &serde_json::json!("failed")
        );
    }
}
