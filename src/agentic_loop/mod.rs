//! AgenticLoop: the LLM⇄tool iteration loop.
//!
//! Grounded on `execution_engine/chat_tool_runner.rs` (own
//! multi-step tool loop — `ChatEvent::LoopStepStarted`/`ToolResult`/
//! `LoopComplete`) and `execution_engine/execution_budget.rs`'s
//! `ToolBudgetTracker` for the budget-exhaustion shape, generalized from a
//! single session-wide call budget to the iteration/token budgets this
//! loop enforces.

use crate::conversation::{ContentBlock, ConversationHistory, ConversationMessage, MessageContent, Role};
use crate::error::CoreResult;
use crate::event::{Event, EventBus, EventPayload, EventType, Mode, Stage};
use crate::external::{
    LLMClient, LLMMessage, LLMRequest, LLMResponse, StopReason, ToolExecutionResult, ToolProvider,
};

const DEFAULT_MAX_TOKENS: u32 = 4096;

fn to_wire_message(message: &ConversationMessage) -> LLMMessage {
    let role = match message.role {
        Role::User => "user".to_string(),
        Role::Assistant => "assistant".to_string(),
    };
    LLMMessage {
        role,
        content: message_content_as_blocks(&message.content),
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStopReason {
    EndTurn,
    MaxIterations,
    MaxTokens,
    Error,
}

impl LoopStopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStopReason::EndTurn => "end_turn",
            LoopStopReason::MaxIterations => "max_iterations",
            LoopStopReason::MaxTokens => "max_tokens",
            LoopStopReason::Error => "error",
        }
    }
}

/// Caller-provided budgets.
#[derive(Debug, Clone, Copy)]
pub struct LoopBudgets {
    pub max_iterations: u32,
    pub max_total_tokens: u64,
}

impl Default for LoopBudgets {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_total_tokens: 200_000,
        }
    }
}

/// The final result of a completed (or halted) loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub final_text: String,
    pub stop_reason: LoopStopReason,
    pub iterations: u32,
    pub tool_calls: u32,
    pub total_tokens: u64,
}

/// Tracks iteration/token consumption across possibly-paused runs of the
/// same task. A paused loop is resumed by restoring `staged_snapshot`/
/// `conversation_snapshot` and calling `AgenticLoop::run` again with a
/// fresh `LoopSession::continue_run`.
#[derive(Debug, Clone)]
pub struct LoopSession {
    pub session_id: String,
    pub task_id: String,
    pub step_id: String,
    pub iteration_count: u32,
    pub continue_count: u32,
    pub token_totals: TokenTotals,
    pub last_stop_reason: Option<LoopStopReason>,
    pub final_text: String,
    pub tool_calls_count: u32,
    pub staged_snapshot: Option<serde_json::Value>,
    pub conversation_snapshot: Vec<ConversationMessage>,
    pub limits: LoopLimits,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
}

impl TokenTotals {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    pub max_iter_per_run: u32,
    pub max_total_iterations: u32,
    pub max_total_tokens: u64,
}

impl LoopSession {
    pub fn new(session_id: String, task_id: String, step_id: String, limits: LoopLimits) -> Self {
        Self {
            session_id,
            task_id,
            step_id,
            iteration_count: 0,
            continue_count: 0,
            token_totals: TokenTotals::default(),
            last_stop_reason: None,
            final_text: String::new(),
            tool_calls_count: 0,
            staged_snapshot: None,
            conversation_snapshot: Vec::new(),
            limits,
        }
    }

    pub fn is_iteration_budget_exhausted(&self) -> bool {
        self.iteration_count >= self.limits.max_total_iterations
    }

    pub fn is_token_budget_exhausted(&self) -> bool {
        self.token_totals.total() >= self.limits.max_total_tokens
    }

    pub fn can_continue(&self) -> bool {
        matches!(self.last_stop_reason, Some(LoopStopReason::MaxIterations))
            && !self.is_iteration_budget_exhausted()
            && !self.is_token_budget_exhausted()
    }

    /// How many more `max_iter_per_run`-sized segments fit in the
    /// remaining total-iteration budget.
    pub fn remaining_continues(&self) -> u32 {
        if self.limits.max_iter_per_run == 0 {
            return 0;
        }
        self.limits
            .max_total_iterations
            .saturating_sub(self.iteration_count)
            / self.limits.max_iter_per_run
    }

    fn record_outcome(&mut self, outcome: &LoopOutcome) {
        self.iteration_count += outcome.iterations;
        self.tool_calls_count += outcome.tool_calls;
        self.last_stop_reason = Some(outcome.stop_reason);
        if !outcome.final_text.is_empty() {
            self.final_text = outcome.final_text.clone();
        }
    }
}

/// Runs the LLM⇄tool loop described in 
pub struct AgenticLoop<'a> {
    pub client: &'a dyn LLMClient,
    pub tools: &'a dyn ToolProvider,
    pub bus: &'a EventBus,
}

impl<'a> AgenticLoop<'a> {
    pub fn new(client: &'a dyn LLMClient, tools: &'a dyn ToolProvider, bus: &'a EventBus) -> Self {
        Self { client, tools, bus }
    }

    /// Runs the loop to completion (or until a budget/error halts it),
    /// updating `session` in place and returning the run's outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        session: &mut LoopSession,
        history: &mut ConversationHistory,
        system_prompt: &str,
        model: &str,
        budgets: LoopBudgets,
        mode: Mode,
        stage: Stage,
        mut on_text: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> CoreResult<LoopOutcome> {
        let mut iterations: u32 = 0;
        let mut tool_calls: u32 = 0;
        let mut totals = session.token_totals;
        let mut final_text = String::new();

        let stop_reason = loop {
            if iterations >= budgets.max_iterations {
                break LoopStopReason::MaxIterations;
            }

            let request = LLMRequest {
                model: model.to_string(),
                system: Some(system_prompt.to_string()),
                messages: history.get_messages().iter().map(to_wire_message).collect(),
                max_tokens: DEFAULT_MAX_TOKENS,
            };

            let message_count = request.messages.len();
            let has_context = message_count > 0;
            let multi_turn = message_count > 1;

            let start_event = self.emit_tool_start(
                session,
                mode,
                stage,
                "llm_call",
                multi_turn,
                message_count,
                has_context,
                budgets.max_total_tokens,
            )?;

            iterations += 1;

            let response = match self.client.create_message(request).await {
                Ok(r) => r,
                Err(e) => {
                    self.emit_tool_end(
                        session,
                        mode,
                        stage,
                        "llm_call",
                        &start_event,
                        None,
                        "failed",
                        Some(e.to_string()),
                    )?;
                    session.token_totals = totals;
                    return Ok(LoopOutcome {
                        final_text,
                        stop_reason: LoopStopReason::Error,
                        iterations,
                        tool_calls,
                        total_tokens: totals.total(),
                    });
                }
            };

            totals.input += response.usage.input_tokens;
            totals.output += response.usage.output_tokens;

            self.emit_tool_end(
                session,
                mode,
                stage,
                "llm_call",
                &start_event,
                Some(&response),
                "completed",
                None,
            )?;

            let mut text_blocks = Vec::new();
            let mut tool_use_blocks = Vec::new();
            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => {
                        text_blocks.push(text.clone());
                        if let Some(cb) = on_text.as_deref_mut() {
                            cb(text);
                        }
                    }
                    ContentBlock::ToolUse { .. } => tool_use_blocks.push(block.clone()),
                    ContentBlock::ToolResult { .. } => {}
                }
            }
            if !text_blocks.is_empty() {
                final_text = text_blocks.join("");
            }

            if matches!(response.stop_reason, StopReason::EndTurn) && tool_use_blocks.is_empty() {
                let _ = history.push(ConversationMessage::assistant_blocks(response.content.clone()));
                break LoopStopReason::EndTurn;
            }

            let _ = history.push(ConversationMessage::assistant_blocks(response.content.clone()));

            let mut tool_result_blocks = Vec::new();
            for block in &tool_use_blocks {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    tool_calls += 1;
                    let tool_start = self.emit_tool_start(
                        session,
                        mode,
                        stage,
                        name,
                        multi_turn,
                        message_count,
                        has_context,
                        budgets.max_total_tokens,
                    )?;

                    let ToolExecutionResult { success, output, error } =
                        self.tools.execute_tool(name, input.clone()).await;
                    let status = if success { "completed" } else { "failed" };

                    self.emit_tool_end(
                        session,
                        mode,
                        stage,
                        name,
                        &tool_start,
                        None,
                        status,
                        error,
                    )?;

                    tool_result_blocks.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: output,
                    });
                }
            }
            let _ = history.push(ConversationMessage::user_blocks(tool_result_blocks));

            if totals.total() >= budgets.max_total_tokens {
                break LoopStopReason::MaxTokens;
            }
        };

        session.token_totals = totals;

        let outcome = LoopOutcome {
            final_text,
            stop_reason,
            iterations,
            tool_calls,
            total_tokens: totals.total(),
        };
        session.record_outcome(&outcome);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_tool_start(
        &self,
        session: &LoopSession,
        mode: Mode,
        stage: Stage,
        tool: &str,
        multi_turn: bool,
        message_count: usize,
        has_context: bool,
        max_tokens: u64,
    ) -> CoreResult<Event> {
        let payload = EventPayload::new()
            .insert("tool", tool)
            .insert("multi_turn", multi_turn)
            .insert("message_count", message_count as u64)
            .insert("has_context", has_context)
            .insert("max_tokens", max_tokens);
        self.bus
            .emit(&session.task_id, EventType::ToolStart, mode, stage, payload, vec![], None)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_tool_end(
        &self,
        session: &LoopSession,
        mode: Mode,
        stage: Stage,
        tool: &str,
        start_event: &Event,
        response: Option<&LLMResponse>,
        status: &str,
        error: Option<String>,
    ) -> CoreResult<Event> {
        let mut payload = EventPayload::new().insert("tool", tool).insert("status", status);
        if let Some(response) = response {
            payload = payload.insert(
                "usage",
                serde_json::json!({
                    "input_tokens": response.usage.input_tokens,
                    "output_tokens": response.usage.output_tokens,
                }),
            );
        }
        if let Some(error) = error {
            payload = payload.insert("error", error);
        }
        self.bus.emit(
            &session.task_id,
            EventType::ToolEnd,
            mode,
            stage,
            payload,
            vec![],
            Some(start_event.event_id.clone()),
        )
    }
}

/// `ContentBlock` fan-out used when converting a stored `ConversationMessage`
/// into an outbound `LLMMessage`.
fn message_content_as_blocks(content: &MessageContent) -> Vec<ContentBlock> {
    match content {
        MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
        MessageContent::Blocks(blocks) => blocks.clone(),
    }
}
