//! End-to-end coverage for `AgenticLoop`: a multi-turn tool-use exchange
//! recorded onto a real `EventStore`, and the max-iterations stop path.

use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::tempdir;

use missioncore::agentic_loop::{
    AgenticLoop, LoopBudgets, LoopLimits, LoopSession, LoopStopReason,
};
use missioncore::conversation::{ContentBlock, ConversationHistory, ConversationMessage};
use missioncore::event::{EventBus, EventStore, EventType, Mode, Stage};
use missioncore::external::{
    LLMClient, LLMClientError, LLMRequest, LLMResponse, LLMUsage, StopReason, StreamEvent,
    ToolExecutionResult, ToolProvider,
};
use missioncore::ids::{FixedClock, SequentialIds};

struct ScriptedClient {
    responses: Mutex<Vec<LLMResponse>>,
}

impl ScriptedClient {
    fn new(responses: Vec<LLMResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn create_message(&self, _request: LLMRequest) -> Result<LLMResponse, LLMClientError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LLMClientError::Transport("scripted responses exhausted".into()));
        }
        Ok(responses.remove(0))
    }

    async fn stream_message(
        &self,
        _request: LLMRequest,
        _on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<(), LLMClientError> {
        unimplemented!("not exercised by these scenarios")
    }
}

/// Echoes back whatever was handed to it, prefixed by the tool name, so
/// assertions can confirm the loop actually threaded tool input through.
struct EchoTools;

#[async_trait]
impl ToolProvider for EchoTools {
    async fn execute_tool(&self, name: &str, input: serde_json::Value) -> ToolExecutionResult {
        ToolExecutionResult::ok(format!("{name}:{input}"))
    }
}

fn event_store(dir: &std::path::Path) -> EventStore {
    EventStore::with_providers(
        dir.join(".missioncore").join("events.jsonl"),
        Box::new(FixedClock::new(1)),
        Box::new(SequentialIds::new()),
    )
    .unwrap()
}

fn default_session(task_id: &str) -> LoopSession {
    LoopSession::new(
        "session_1".to_string(),
        task_id.to_string(),
        "step_1".to_string(),
        LoopLimits {
            max_iter_per_run: 10,
            max_total_iterations: 100,
            max_total_tokens: 1_000_000,
        },
    )
}

fn usage(input_tokens: u64, output_tokens: u64) -> LLMUsage {
    LLMUsage {
        input_tokens,
        output_tokens,
    }
}

#[tokio::test]
async fn tool_call_then_end_turn_is_fully_recorded_on_the_bus() {
    let dir = tempdir().unwrap();
    let store = event_store(dir.path());
    let bus = EventBus::new(store);

    let client = ScriptedClient::new(vec![
        LLMResponse {
            id: "resp_1".into(),
            content: vec![ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "src/lib.rs"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(20, 10),
        },
        LLMResponse {
            id: "resp_2".into(),
            content: vec![ContentBlock::Text {
                text: "done reading".into(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: usage(30, 5),
        },
    ]);
    let tools = EchoTools;
    let runner = AgenticLoop::new(&client, &tools, &bus);

    let mut history = ConversationHistory::new();
    history.push(ConversationMessage::user_text("read the file")).unwrap();

    let mut session = default_session("task_loop_1");
    let outcome = runner
        .run(
            &mut session,
            &mut history,
            "be careful",
            "claude-3",
            LoopBudgets::default(),
            Mode::Mission,
            Stage::Edit,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, LoopStopReason::EndTurn);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(outcome.final_text, "done reading");
    assert_eq!(outcome.total_tokens, 65);

    // The conversation thread carries the assistant tool_use, the user
    // tool_result, and the final assistant text, in order.
    let messages = history.get_messages();
    assert_eq!(messages.len(), 3);

    let events = bus.store().read_all().unwrap();
    let for_task: Vec<_> = events.into_iter().filter(|e| e.task_id == "task_loop_1").collect();
    let tool_starts = for_task.iter().filter(|e| e.event_type == EventType::ToolStart).count();
    let tool_ends = for_task.iter().filter(|e| e.event_type == EventType::ToolEnd).count();
    // One llm_call start/end per iteration (2), plus one for the
    // read_file tool invocation itself.
    assert_eq!(tool_starts, 3);
    assert_eq!(tool_ends, 3);

    // Every ToolEnd's parent_event_id points back at a real ToolStart.
    let start_ids: Vec<&str> = for_task
        .iter()
        .filter(|e| e.event_type == EventType::ToolStart)
        .map(|e| e.event_id.as_str())
        .collect();
    for end in for_task.iter().filter(|e| e.event_type == EventType::ToolEnd) {
        let parent = end.parent_event_id.as_deref().unwrap();
        assert!(start_ids.contains(&parent));
    }
}

#[tokio::test]
async fn max_iterations_budget_halts_the_loop_without_erroring() {
    let dir = tempdir().unwrap();
    let store = event_store(dir.path());
    let bus = EventBus::new(store);

    // Every response calls a tool, so the loop never reaches EndTurn on
    // its own and must be stopped by the iteration budget.
    let responses = (0..5)
        .map(|i| LLMResponse {
            id: format!("resp_{i}"),
            content: vec![ContentBlock::ToolUse {
                id: format!("tu_{i}"),
                name: "noop".into(),
                input: serde_json::json!({}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: usage(1, 1),
        })
        .collect();
    let client = ScriptedClient::new(responses);
    let tools = EchoTools;
    let runner = AgenticLoop::new(&client, &tools, &bus);

    let mut history = ConversationHistory::new();
    history.push(ConversationMessage::user_text("loop forever")).unwrap();

    let mut session = default_session("task_loop_2");
    let outcome = runner
        .run(
            &mut session,
            &mut history,
            "system",
            "claude-3",
            LoopBudgets {
                max_iterations: 3,
                max_total_tokens: 1_000_000,
            },
            Mode::Mission,
            Stage::Edit,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, LoopStopReason::MaxIterations);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(session.iteration_count, 3);
    assert!(session.can_continue());
}

#[tokio::test]
async fn transport_error_stops_the_loop_with_an_error_outcome() {
    let dir = tempdir().unwrap();
    let store = event_store(dir.path());
    let bus = EventBus::new(store);

    let client = ScriptedClient::new(vec![]); // empty: first call fails
    let tools = EchoTools;
    let runner = AgenticLoop::new(&client, &tools, &bus);

    let mut history = ConversationHistory::new();
    history.push(ConversationMessage::user_text("hi")).unwrap();

    let mut session = default_session("task_loop_3");
    let outcome = runner
        .run(
            &mut session,
            &mut history,
            "system",
            "claude-3",
            LoopBudgets::default(),
            Mode::Answer,
            Stage::None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, LoopStopReason::Error);
    assert_eq!(outcome.iterations, 1);

    let events = bus.store().read_all().unwrap();
    let failed_tool_end = events
        .iter()
        .any(|e| e.event_type == EventType::ToolEnd && e.task_id == "task_loop_3");
    assert!(failed_tool_end);
}
