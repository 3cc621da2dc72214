//! CommandPhase: the single entry point shared by
//! auto-verify and user-initiated command runs.
//!
//! Spawning is grounded on `tools/src/manager/executors/
//! subprocess.rs::SubprocessExecutor::execute_command` (spawn via
//! `tokio::process::Command`, piped stdout/stderr, wall-clock duration),
//! generalized from a single fire-and-collect call into a streamed,
//! throttled, truncating run over a command list. Safety classification
//! reuses [`crate::command_policy::CommandPolicy`] rather than
//! reimplementing it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use crate::command_policy::{CommandKind, CommandPolicy, PolicyMode};
use crate::error::CoreResult;
use crate::event::{EventBus, EventPayload, EventType, Mode, Stage};
use crate::evidence::{EvidenceKind, EvidenceStore};

/// Who asked for this run, governing stop-on-failure behavior (
/// §4.13: "For verify context, stops on first non-zero exit; for user
/// context, continues.").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandContext {
    Verify,
    User,
}

/// Inputs to [`run_command_phase`].
pub struct CommandPhaseCtx<'a> {
    pub task_id: &'a str,
    pub mode: Mode,
    pub stage_before: Stage,
    pub context: CommandContext,
    pub commands: Vec<String>,
    pub working_dir: PathBuf,
    pub policy: &'a CommandPolicy,
    /// Replay-safety: a replay/audit pass over an already-recorded task
    /// must never spawn processes or append new events.
    pub is_replay_or_audit: bool,
    /// Pre-approval from a prior `command_proposed` decision, allowing a
    /// long-running or prompt-mode command to proceed without asking
    /// again for this call.
    pub pre_approved: bool,
}

/// Result of a single command's execution, recorded inside
/// [`CommandPhaseOutcome::completed`].
#[derive(Debug, Clone)]
pub struct CommandRunResult {
    pub command: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    pub truncated: bool,
    pub evidence_id: String,
}

/// What [`run_command_phase`] produced.
#[derive(Debug, Clone)]
pub enum CommandPhaseOutcome {
    /// `ctx.is_replay_or_audit` short-circuit.
    Skipped,
    /// A command was unsafe, or `policy.mode == Off`.
    Rejected { command: String },
    /// A long-running or prompt-mode command needs a decision before
    /// this phase may proceed.
    AwaitingApproval { command: String },
    /// All commands ran (or the verify-context run stopped on the first
    /// failure); results are in append order.
    Completed { results: Vec<CommandRunResult> },
}

const MAX_PROGRESS_CHUNK_BYTES: usize = 8192;

struct StreamBuffer {
    bytes: Vec<u8>,
    truncated: bool,
    max_bytes: usize,
}

impl StreamBuffer {
    fn new(max_bytes: usize) -> Self {
        Self {
            bytes: Vec::new(),
            truncated: false,
            max_bytes,
        }
    }

    /// Appends `chunk`, keeping only the latest half of the buffer once
    /// it would exceed `max_bytes`.
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.max_bytes {
            self.truncated = true;
            let keep_from = self.bytes.len() - self.max_bytes / 2;
            self.bytes.drain(0..keep_from);
        }
    }

    fn line_count(&self) -> usize {
        String::from_utf8_lossy(&self.bytes).lines().count()
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Runs `ctx.commands` in order, stopping early in a verify context
/// on the first non-zero exit.
pub async fn run_command_phase(
    ctx: CommandPhaseCtx<'_>,
    bus: &EventBus,
    evidence: &EvidenceStore,
) -> CoreResult<CommandPhaseOutcome> {
    if ctx.is_replay_or_audit {
        return Ok(CommandPhaseOutcome::Skipped);
    }

    bus.emit(
        ctx.task_id,
        EventType::StageChanged,
        ctx.mode,
        Stage::Command,
        EventPayload::new()
            .insert("from_stage", ctx.stage_before.to_string())
            .insert("to_stage", Stage::Command.to_string()),
        vec![],
        None,
    )?;

    if ctx.policy.mode == PolicyMode::Off {
        let command = ctx.commands.first().cloned().unwrap_or_default();
        return Ok(CommandPhaseOutcome::Rejected { command });
    }

    for command in &ctx.commands {
        if !ctx.policy.is_command_safe(command) {
            return Ok(CommandPhaseOutcome::Rejected {
                command: command.clone(),
            });
        }
    }

    if !ctx.pre_approved {
        for command in &ctx.commands {
            let needs_approval = ctx.policy.classify_command_kind(command) == CommandKind::LongRunning
                || ctx.policy.mode == PolicyMode::Prompt;
            if needs_approval {
                bus.emit(
                    ctx.task_id,
                    EventType::CommandProposed,
                    ctx.mode,
                    Stage::Command,
                    EventPayload::new().insert("command", command.clone()),
                    vec![],
                    None,
                )?;
                bus.emit(
                    ctx.task_id,
                    EventType::DecisionPointNeeded,
                    ctx.mode,
                    Stage::Command,
                    EventPayload::new()
                        .insert("reason", "command_approval")
                        .insert("command", command.clone()),
                    vec![],
                    None,
                )?;
                return Ok(CommandPhaseOutcome::AwaitingApproval {
                    command: command.clone(),
                });
            }
        }
    }

    let mut results = Vec::with_capacity(ctx.commands.len());
    for command in &ctx.commands {
        let result = execute_one(ctx.task_id, ctx.mode, command, &ctx.working_dir, ctx.policy, bus, evidence).await?;
        let stop = ctx.context == CommandContext::Verify && result.exit_code != 0;
        results.push(result);
        if stop {
            break;
        }
    }

    Ok(CommandPhaseOutcome::Completed { results })
}

async fn execute_one(
    task_id: &str,
    mode: Mode,
    command: &str,
    working_dir: &PathBuf,
    policy: &CommandPolicy,
    bus: &EventBus,
    evidence: &EvidenceStore,
) -> CoreResult<CommandRunResult> {
    bus.emit(
        task_id,
        EventType::CommandStarted,
        mode,
        Stage::Command,
        EventPayload::new().insert("command", command.to_string()),
        vec![],
        None,
    )?;

    let start = Instant::now();
    let spawned = TokioCommand::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return finish_spawn_error(task_id, mode, command, &e.to_string(), start.elapsed(), bus, evidence);
        }
    };

    let mut stdout_buf = StreamBuffer::new(policy.max_output_bytes_per_command);
    let mut stderr_buf = StreamBuffer::new(policy.max_output_bytes_per_command);
    let mut last_emit = Instant::now();

    let mut stdout_reader = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
    let mut stderr_reader = BufReader::new(child.stderr.take().expect("piped stderr")).lines();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(text)) => {
                        stdout_buf.push(text.as_bytes());
                        stdout_buf.push(b"\n");
                        maybe_emit_progress(task_id, mode, command, policy, &mut last_emit, "stdout", &text, bus)?;
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(text)) => {
                        stderr_buf.push(text.as_bytes());
                        stderr_buf.push(b"\n");
                        maybe_emit_progress(task_id, mode, command, policy, &mut last_emit, "stderr", &text, bus)?;
                    }
                    _ => stderr_done = true,
                }
            }
        }
    }

    let status = child.wait().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            return finish_spawn_error(task_id, mode, command, &e.to_string(), start.elapsed(), bus, evidence);
        }
    };

    let transcript = format!(
        "$ {command}\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
        stdout_buf.text(),
        stderr_buf.text()
    );
    let evidence_id = evidence.write(EvidenceKind::CommandTranscript, transcript.as_bytes())?;
    let truncated = stdout_buf.truncated || stderr_buf.truncated;

    bus.emit(
        task_id,
        EventType::CommandCompleted,
        mode,
        Stage::Command,
        EventPayload::new()
            .insert("command", command.to_string())
            .insert("exit_code", exit_code as i64)
            .insert("duration_ms", duration_ms)
            .insert("stdout_lines", stdout_buf.line_count() as u64)
            .insert("stderr_lines", stderr_buf.line_count() as u64)
            .insert("truncated", truncated)
            .insert("evidence_id", evidence_id.clone()),
        vec![evidence_id.clone()],
        None,
    )?;

    Ok(CommandRunResult {
        command: command.to_string(),
        exit_code,
        duration_ms,
        stdout_lines: stdout_buf.line_count(),
        stderr_lines: stderr_buf.line_count(),
        truncated,
        evidence_id,
    })
}

fn maybe_emit_progress(
    task_id: &str,
    mode: Mode,
    command: &str,
    policy: &CommandPolicy,
    last_emit: &mut Instant,
    stream: &str,
    text: &str,
    bus: &EventBus,
) -> CoreResult<()> {
    if last_emit.elapsed() < Duration::from_millis(policy.chunk_throttle_ms) {
        return Ok(());
    }
    *last_emit = Instant::now();
    let chunk: String = text.chars().take(MAX_PROGRESS_CHUNK_BYTES).collect();
    bus.emit(
        task_id,
        EventType::CommandProgress,
        mode,
        Stage::Command,
        EventPayload::new()
            .insert("command", command.to_string())
            .insert("stream", stream)
            .insert("chunk", chunk),
        vec![],
        None,
    )?;
    Ok(())
}

/// "Handles spawn errors by synthesizing exit_code=-1
/// with the error message."
fn finish_spawn_error(
    task_id: &str,
    mode: Mode,
    command: &str,
    message: &str,
    elapsed: Duration,
    bus: &EventBus,
    evidence: &EvidenceStore,
) -> CoreResult<CommandRunResult> {
    let transcript = format!("$ {command}\n--- spawn error ---\n{message}\n");
    let evidence_id = evidence.write(EvidenceKind::CommandTranscript, transcript.as_bytes())?;

    bus.emit(
        task_id,
        EventType::CommandCompleted,
        mode,
        Stage::Command,
        EventPayload::new()
            .insert("command", command.to_string())
            .insert("exit_code", -1i64)
            .insert("duration_ms", elapsed.as_millis() as u64)
            .insert("stdout_lines", 0u64)
            .insert("stderr_lines", 0u64)
            .insert("truncated", false)
            .insert("evidence_id", evidence_id.clone())
            .insert("error", message.to_string()),
        vec![evidence_id.clone()],
        None,
    )?;

    Ok(CommandRunResult {
        command: command.to_string(),
        exit_code: -1,
        duration_ms: elapsed.as_millis() as u64,
        stdout_lines: 0,
        stderr_lines: 0,
        truncated: false,
        evidence_id,
    })
}
