//! TruncationSafeExecutor — the hard core.
//!
//! Grounded on `execution_engine/stall_detector.rs`'s ledger-driven
//! retry/pause state machine and `execution_engine/circuit_breaker.rs`'s
//! per-key failure counting, generalized from per-tool circuits to
//! per-file edit attempts.

pub mod ledger;
pub mod preflight;

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::conversation::ContentBlock;
use crate::error::{CoreError, CoreResult};
use crate::external::{LLMClient, LLMClientError, LLMMessage, LLMRequest, StopReason};
use crate::llm_edit::{extract_json_candidate, Confidence, FileAction, LLMEditError, LLMEditStepOutput, TouchedFile, ValidationStatus};

pub use ledger::{EditAttemptLedger, SingleFileOutcome};
pub use preflight::{run_preflight, Complexity, PreflightResult};

/// L1 — the three truncation signals; any one marks output
/// truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationSignal {
    StopReason(String),
    JsonParseFailure,
    MissingCompleteSentinel,
}

#[derive(Debug, Clone, Copy)]
pub struct TruncationDetectorConfig {
    /// Whether the absence of a `complete: true` sentinel counts as a
    /// truncation signal.
    pub require_complete_sentinel: bool,
}

impl Default for TruncationDetectorConfig {
    fn default() -> Self {
        Self {
            require_complete_sentinel: true,
        }
    }
}

const TRUNCATING_STOP_REASONS: &[&str] = &["max_tokens", "length", "stop_sequence"];

/// Wire-format name for a `StopReason`, matching `TRUNCATING_STOP_REASONS`
/// (a plain `{:?}` would yield e.g. "MaxTokens", not "max_tokens").
fn stop_reason_wire_name(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::ToolUse => "tool_use",
        StopReason::MaxTokens => "max_tokens",
        StopReason::Length => "length",
        StopReason::StopSequence => "stop_sequence",
    }
}

/// L1 — Truncation detection.
pub fn detect_truncation(
    stop_reason: &str,
    parse_ok: bool,
    complete_sentinel: Option<bool>,
    config: TruncationDetectorConfig,
) -> Option<TruncationSignal> {
    if TRUNCATING_STOP_REASONS.contains(&stop_reason) {
        return Some(TruncationSignal::StopReason(stop_reason.to_string()));
    }
    if !parse_ok {
        return Some(TruncationSignal::JsonParseFailure);
    }
    if config.require_complete_sentinel && complete_sentinel != Some(true) {
        return Some(TruncationSignal::MissingCompleteSentinel);
    }
    None
}

/// Result of one pass through the executor.
#[derive(Debug, Clone)]
pub enum TruncationOutcome {
    Completed(LLMEditStepOutput),
    /// L4 — graceful degradation. Never carries partial output.
    PausedForDecision { pause_reason: String },
}

#[derive(Debug, Clone)]
pub struct TruncationSafeExecutorConfig {
    pub max_retries_per_file: u32,
    pub require_complete_sentinel: bool,
    pub max_backoff_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for TruncationSafeExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries_per_file: 3,
            require_complete_sentinel: true,
            max_backoff_attempts: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

/// Exponential backoff with jitter for transient overload (HTTP 529) and
/// rate limiting (429) responses.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 1u64 << attempt.min(10);
    let exp_ms = (base.as_millis() as u64).saturating_mul(multiplier);
    let jitter_ms = rand::thread_rng().gen_range(0..=(exp_ms / 4 + 1));
    Duration::from_millis(exp_ms.saturating_add(jitter_ms))
}

fn is_retryable(error: &LLMClientError) -> bool {
    matches!(error, LLMClientError::Overloaded | LLMClientError::RateLimited)
}

/// Raw shape of a single-file L2 response: either a change
/// or the `no_changes` escape hatch, both carrying `complete: true`.
#[derive(Debug, Deserialize)]
struct SingleFileResponse {
    #[allow(dead_code)]
    file: String,
    #[serde(default)]
    action: Option<FileAction>,
    #[serde(default)]
    unified_diff: Option<String>,
    #[serde(default)]
    new_content: Option<String>,
    #[serde(default)]
    base_sha: Option<String>,
    #[serde(default)]
    no_changes: bool,
    #[serde(default)]
    complete: bool,
}

pub struct TruncationSafeExecutor<'a> {
    client: &'a dyn LLMClient,
    config: TruncationSafeExecutorConfig,
}

impl<'a> TruncationSafeExecutor<'a> {
    pub fn new(client: &'a dyn LLMClient) -> Self {
        Self {
            client,
            config: TruncationSafeExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TruncationSafeExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Send one `LLMRequest` with transient-failure retry (529/429)
    /// before surfacing a hard error.
    async fn call_with_retry(&self, request: LLMRequest) -> Result<crate::external::LLMResponse, LLMClientError> {
        let mut attempt = 0;
        loop {
            match self.client.create_message(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) && attempt < self.config.max_backoff_attempts => {
                    let delay = backoff_delay(self.config.base_backoff, attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// L2 — single-file recovery call for `file`, honoring the narrower
    /// schema and its `no_changes` escape.
    async fn run_single_file(
        &self,
        model: &str,
        file: &str,
        task_description: &str,
    ) -> Result<SingleFileOutcome, String> {
        let prompt = format!(
            "Edit exactly one file: {file}.\nTask: {task_description}\nRespond with JSON {{file, action, unified_diff?, new_content?, base_sha, complete:true}} or {{file, no_changes:true, complete:true}}. Nothing else."
        );
        let request = LLMRequest {
            model: model.to_string(),
            system: None,
            messages: vec![LLMMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::Text { text: prompt }],
            }],
            max_tokens: 4096,
        };

        let response = self
            .call_with_retry(request)
            .await
            .map_err(|e| e.to_string())?;

        let text = response
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let candidate = extract_json_candidate(&text).map_err(|e| e.to_string())?;
        let parsed: SingleFileResponse =
            serde_json::from_str(&candidate).map_err(|e| format!("schema_error: {e}"))?;

        if !parsed.complete {
            return Err("missing complete:true sentinel".to_string());
        }
        if parsed.no_changes {
            return Ok(SingleFileOutcome::NoChanges);
        }

        let action = parsed
            .action
            .ok_or_else(|| "missing 'action' for a changed file".to_string())?;
        Ok(SingleFileOutcome::Changed {
            action,
            unified_diff: parsed.unified_diff,
            new_content: parsed.new_content,
            base_sha: parsed.base_sha,
        })
    }

    /// L2/L3 — drive the ledger to settlement, one single-file call per
    /// pending file per round.
    async fn run_split_recovery(
        &self,
        model: &str,
        target_files: &[String],
        task_description: &str,
    ) -> TruncationOutcome {
        let mut ledger = EditAttemptLedger::new(target_files, self.config.max_retries_per_file);

        while !ledger.is_settled() {
            let pending = ledger.pending_files();
            for file in pending {
                match self.run_single_file(model, &file, task_description).await {
                    Ok(outcome) => ledger.record_success(&file, outcome),
                    Err(e) => ledger.record_failure(&file, e),
                }
            }
        }

        if !ledger.all_resolved() {
            let breakdown = ledger
                .unrecovered_files()
                .into_iter()
                .map(|(path, err)| format!("{path}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return TruncationOutcome::PausedForDecision {
                pause_reason: format!("could not resolve all files after retries — {breakdown}"),
            };
        }

        TruncationOutcome::Completed(combine_ledger(&ledger))
    }

    /// Entry point: L0 preflight, then either the single-call path or L2
    /// split recovery (L3 proactive split, or reactive after L1 detects
    /// truncation on the single call).
    pub async fn execute_step(
        &self,
        model: &str,
        file_context: &[String],
        step_description: &str,
        total_context_lines: usize,
    ) -> CoreResult<TruncationOutcome> {
        let preflight = run_preflight(file_context, step_description, total_context_lines);

        if preflight.should_split {
            return Ok(self
                .run_split_recovery(model, &preflight.target_files, step_description)
                .await);
        }

        let prompt = format!(
            "Task: {step_description}\nRespond with JSON {{unified_diff, touched_files, confidence, notes, validation_status, complete:true}}. Nothing else."
        );
        let request = LLMRequest {
            model: model.to_string(),
            system: None,
            messages: vec![LLMMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::Text { text: prompt }],
            }],
            max_tokens: 8192,
        };

        let response = self
            .call_with_retry(request)
            .await
            .map_err(|e| CoreError::LlmError(e.to_string()))?;

        let text = response
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let parse_result = extract_json_candidate(&text).and_then(|candidate| {
            serde_json::from_str::<SingleCallResponse>(&candidate)
                .map_err(|e| LLMEditError::Schema(e.to_string()))
        });

        let signal = detect_truncation(
            stop_reason_wire_name(response.stop_reason),
            parse_result.is_ok(),
            parse_result.as_ref().ok().map(|r| r.complete),
            TruncationDetectorConfig {
                require_complete_sentinel: self.config.require_complete_sentinel,
            },
        );

        match signal {
            None => {
                let parsed = parse_result.map_err(CoreError::from)?;
                Ok(TruncationOutcome::Completed(parsed.into_output()))
            }
            Some(_truncated) => Ok(self
                .run_split_recovery(model, &preflight.target_files, step_description)
                .await),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SingleCallResponse {
    unified_diff: String,
    touched_files: Vec<SingleCallTouchedFile>,
    confidence: Confidence,
    #[serde(default)]
    notes: String,
    validation_status: String,
    #[serde(default)]
    complete: bool,
}

#[derive(Debug, Deserialize)]
struct SingleCallTouchedFile {
    path: String,
    action: FileAction,
    new_content: Option<String>,
    base_sha: Option<String>,
}

impl SingleCallResponse {
    fn into_output(self) -> LLMEditStepOutput {
        LLMEditStepOutput {
            unified_diff: self.unified_diff,
            touched_files: self
                .touched_files
                .into_iter()
                .map(|f| TouchedFile {
                    path: f.path,
                    action: f.action,
                    new_content: f.new_content,
                    base_sha: f.base_sha,
                })
                .collect(),
            confidence: self.confidence,
            notes: self.notes,
            validation_status: ValidationStatus::from_alias(&self.validation_status)
                .unwrap_or(ValidationStatus::CannotEdit),
        }
    }
}

/// Combine a settled, fully-resolved ledger into one `LLMEditStepOutput`
///: touched files unioned, diffs
/// concatenated, `confidence="high"`, `validation_status="ok"`.
fn combine_ledger(ledger: &EditAttemptLedger) -> LLMEditStepOutput {
    let mut diffs = Vec::new();
    let mut touched_files = Vec::new();

    for (path, outcome) in ledger.touched() {
        if let SingleFileOutcome::Changed {
            action,
            unified_diff,
            new_content,
            base_sha,
        } = outcome
        {
            if let Some(diff) = unified_diff {
                diffs.push(diff.clone());
            }
            touched_files.push(TouchedFile {
                path: path.to_string(),
                action: *action,
                new_content: new_content.clone(),
                base_sha: base_sha.clone(),
            });
        }
    }

    LLMEditStepOutput {
        unified_diff: diffs.join("\n"),
        touched_files,
        confidence: Confidence::High,
        notes: "combined from per-file split recovery".to_string(),
        validation_status: ValidationStatus::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_signal_takes_priority() {
        let signal = detect_truncation(
            "max_tokens",
            true,
            Some(true),
            TruncationDetectorConfig::default(),
        );
        assert_eq!(signal, Some(TruncationSignal::StopReason("max_tokens".to_string())));
    }

    #[test]
    fn parse_failure_is_detected() {
        let signal = detect_truncation(
            "end_turn",
            false,
            Some(true),
            TruncationDetectorConfig::default(),
        );
        assert_eq!(signal, Some(TruncationSignal::JsonParseFailure));
    }

    #[test]
    fn missing_complete_sentinel_detected_when_required() {
        let signal = detect_truncation(
            "end_turn",
            true,
            Some(false),
            TruncationDetectorConfig {
                require_complete_sentinel: true,
            },
        );
        assert_eq!(signal, Some(TruncationSignal::MissingCompleteSentinel));
    }

    #[test]
    fn no_signal_when_everything_clean() {
        let signal = detect_truncation(
            "end_turn",
            true,
            Some(true),
            TruncationDetectorConfig::default(),
        );
        assert_eq!(signal, None);
    }

    #[test]
    fn sentinel_requirement_can_be_disabled() {
        let signal = detect_truncation(
            "end_turn",
            true,
            None,
            TruncationDetectorConfig {
                require_complete_sentinel: false,
            },
        );
        assert_eq!(signal, None);
    }

    #[test]
    fn combining_ledger_unions_files_and_concatenates_diffs() {
        let mut ledger = EditAttemptLedger::new(&["a.rs".to_string(), "b.rs".to_string()], 1);
        ledger.record_success(
            "a.rs",
            SingleFileOutcome::Changed {
                action: FileAction::Update,
                unified_diff: Some("diff-a".to_string()),
                new_content: Some("a content".to_string()),
                base_sha: Some("sha-a".to_string()),
            },
        );
        ledger.record_success("b.rs", SingleFileOutcome::NoChanges);

        let combined = combine_ledger(&ledger);
        assert_eq!(combined.touched_files.len(), 1);
        assert_eq!(combined.unified_diff, "diff-a");
        assert_eq!(combined.confidence, Confidence::High);
        assert_eq!(combined.validation_status, ValidationStatus::Ok);
    }

    #[test]
    fn combining_is_deterministic_for_identical_ledger_states() {
        let build = || {
            let mut ledger = EditAttemptLedger::new(&["a.rs".to_string()], 1);
            ledger.record_success(
                "a.rs",
                SingleFileOutcome::Changed {
                    action: FileAction::Create,
                    unified_diff: Some("diff-a".to_string()),
                    new_content: Some("x".to_string()),
                    base_sha: None,
                },
            );
            ledger
        };
        let a = combine_ledger(&build());
        let b = combine_ledger(&build());
        assert_eq!(a.unified_diff, b.unified_diff);
        assert_eq!(a.touched_files.len(), b.touched_files.len());
    }
}
