//! LLMEditTool.
//!
//! Grounded on `llm/types.rs`'s structured-plan-format discipline (no
//! inference inside the parser, just validated data) and `llm/tool_call.rs`'s
//! deterministic, no-dependency text parsing style, generalized from its
//! `TOOL_CALL:` line grammar to the strict JSON contract this tool's
//! system prompt demands from the model.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::conversation::ContentBlock;
use crate::error::{CoreError, CoreResult};
use crate::event::{EventBus, EventPayload, EventType, Mode, Stage};
use crate::external::{LLMClient, LLMMessage, LLMRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Ok,
    StaleContext,
    CannotEdit,
}

impl ValidationStatus {
    /// Normalize a small alias dictionary onto the canonical three values
    ///.
    pub(crate) fn from_alias(raw: &str) -> Option<Self> {
        match raw {
            "ok" | "success" => Some(Self::Ok),
            "stale_context" | "stale" => Some(Self::StaleContext),
            "cannot_edit" | "failed" => Some(Self::CannotEdit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TouchedFile {
    pub path: String,
    pub action: FileAction,
    pub new_content: Option<String>,
    pub base_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LLMEditStepOutput {
    pub unified_diff: String,
    pub touched_files: Vec<TouchedFile>,
    pub confidence: Confidence,
    pub notes: String,
    pub validation_status: ValidationStatus,
}

/// Raw JSON shape the model's response is parsed into, before validation.
#[derive(Debug, Deserialize)]
struct RawEditResponse {
    unified_diff: String,
    touched_files: Vec<RawTouchedFile>,
    confidence: Confidence,
    #[serde(default)]
    notes: String,
    validation_status: String,
}

#[derive(Debug, Deserialize)]
struct RawTouchedFile {
    path: String,
    action: FileAction,
    new_content: Option<String>,
    base_sha: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LLMEditError {
    #[error("schema_error: {0}")]
    Schema(String),
    #[error("validation_error: {0}")]
    Validation(String),
    #[error("parse_error: {0}")]
    Parse(String),
    #[error("llm_error: {0}")]
    LlmError(String),
}

impl LLMEditError {
    fn kind(&self) -> &'static str {
        match self {
            LLMEditError::Schema(_) => "schema_error",
            LLMEditError::Validation(_) => "validation_error",
            LLMEditError::Parse(_) => "parse_error",
            LLMEditError::LlmError(_) => "llm_error",
        }
    }
}

impl From<LLMEditError> for CoreError {
    fn from(e: LLMEditError) -> Self {
        match e {
            LLMEditError::Schema(m) => CoreError::Schema(m),
            LLMEditError::Validation(m) => CoreError::Validation(m),
            LLMEditError::Parse(m) => CoreError::Parse(m),
            LLMEditError::LlmError(m) => CoreError::LlmError(m),
        }
    }
}

const SYSTEM_PROMPT: &str = r#"Respond with a single JSON object of shape:
{"unified_diff": string, "touched_files": [{"path": string, "action": "create"|"update"|"delete", "new_content": string|null, "base_sha": string|null}], "confidence": "low"|"medium"|"high", "notes": string, "validation_status": "ok"|"stale_context"|"cannot_edit"}
Return nothing else: no prose, no markdown fences."#;

/// Strip ```…``` code fences, locate the outermost `{…}` span, and drop
/// control characters from string content before handing the remainder to
/// `serde_json`.
pub(crate) fn extract_json_candidate(raw: &str) -> Result<String, LLMEditError> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        text = stripped
            .trim_start_matches("json")
            .trim_start_matches('\n');
        if let Some(end) = text.rfind("```") {
            text = &text[..end];
        }
    }

    let start = text
        .find('{')
        .ok_or_else(|| LLMEditError::Parse("no opening brace found in response".to_string()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| LLMEditError::Parse("no closing brace found in response".to_string()))?;
    if end < start {
        return Err(LLMEditError::Parse("unbalanced braces in response".to_string()));
    }

    let candidate: String = text[start..=end]
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    Ok(candidate)
}

#[derive(Debug, Clone)]
pub struct LLMEditLimits {
    pub max_files: usize,
    pub max_changed_lines: usize,
}

impl Default for LLMEditLimits {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_changed_lines: 2000,
        }
    }
}

fn count_diff_lines(unified_diff: &str) -> usize {
    unified_diff
        .lines()
        .filter(|l| {
            (l.starts_with('+') && !l.starts_with("+++"))
                || (l.starts_with('-') && !l.starts_with("---"))
        })
        .count()
}

/// Calls the LLM with the edit-generation system prompt, parses and
/// validates its response, and emits `tool_end`.
pub struct LLMEditTool<'a> {
    client: &'a dyn LLMClient,
    bus: &'a EventBus,
    limits: LLMEditLimits,
}

impl<'a> LLMEditTool<'a> {
    pub fn new(client: &'a dyn LLMClient, bus: &'a EventBus) -> Self {
        Self {
            client,
            bus,
            limits: LLMEditLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: LLMEditLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn run(
        &self,
        task_id: &str,
        mode: Mode,
        stage: Stage,
        model: &str,
        user_prompt: &str,
    ) -> CoreResult<LLMEditStepOutput> {
        let started = Instant::now();
        let result = self.run_inner(model, user_prompt).await;

        let (status, error_field) = match &result {
            Ok(_) => ("ok".to_string(), None),
            Err(e) => (e.kind().to_string(), Some(e.to_string())),
        };
        let mut payload = EventPayload::new()
            .insert("tool", "llm_edit")
            .insert("status", status)
            .insert("duration_ms", started.elapsed().as_millis() as u64);
        if let Some(err) = error_field {
            payload = payload.insert("error", err);
        }
        self.bus
            .emit(task_id, EventType::ToolEnd, mode, stage, payload, vec![], None)?;

        result.map_err(CoreError::from)
    }

    async fn run_inner(&self, model: &str, user_prompt: &str) -> Result<LLMEditStepOutput, LLMEditError> {
        let request = LLMRequest {
            model: model.to_string(),
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![LLMMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::Text {
                    text: user_prompt.to_string(),
                }],
            }],
            max_tokens: 8192,
        };

        let response = self
            .client
            .create_message(request)
            .await
            .map_err(|e| LLMEditError::LlmError(e.to_string()))?;

        let text = response
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let candidate = extract_json_candidate(&text)?;
        let raw: RawEditResponse = serde_json::from_str(&candidate)
            .map_err(|e| LLMEditError::Schema(format!("response did not match schema: {e}")))?;

        let validation_status = ValidationStatus::from_alias(&raw.validation_status)
            .ok_or_else(|| {
                LLMEditError::Schema(format!(
                    "unrecognized validation_status '{}'",
                    raw.validation_status
                ))
            })?;

        if raw.touched_files.len() > self.limits.max_files {
            return Err(LLMEditError::Validation(format!(
                "touched_files count {} exceeds max_files {}",
                raw.touched_files.len(),
                self.limits.max_files
            )));
        }

        let changed_lines = count_diff_lines(&raw.unified_diff);
        if changed_lines > self.limits.max_changed_lines {
            return Err(LLMEditError::Validation(format!(
                "changed line count {changed_lines} exceeds max_changed_lines {}",
                self.limits.max_changed_lines
            )));
        }

        let mut touched_files = Vec::with_capacity(raw.touched_files.len());
        for mut file in raw.touched_files {
            if file.path.trim().is_empty() {
                return Err(LLMEditError::Validation(
                    "touched file missing 'path'".to_string(),
                ));
            }
            match file.action {
                FileAction::Create => {
                    if file.new_content.is_none() {
                        return Err(LLMEditError::Validation(format!(
                            "'{}': new_content required for create",
                            file.path
                        )));
                    }
                    // base_sha is meaningless for a file that doesn't yet exist.
                    file.base_sha = None;
                }
                FileAction::Update => {
                    if file.new_content.is_none() {
                        return Err(LLMEditError::Validation(format!(
                            "'{}': new_content required for update",
                            file.path
                        )));
                    }
                    if file.base_sha.is_none() {
                        return Err(LLMEditError::Validation(format!(
                            "'{}': base_sha required for update",
                            file.path
                        )));
                    }
                }
                FileAction::Delete => {
                    if file.base_sha.is_none() {
                        return Err(LLMEditError::Validation(format!(
                            "'{}': base_sha required for delete",
                            file.path
                        )));
                    }
                }
            }
            touched_files.push(TouchedFile {
                path: file.path,
                action: file.action,
                new_content: file.new_content,
                base_sha: file.base_sha,
            });
        }

        Ok(LLMEditStepOutput {
            unified_diff: raw.unified_diff,
            touched_files,
            confidence: raw.confidence,
            notes: raw.notes,
            validation_status,
        })
    }
}
