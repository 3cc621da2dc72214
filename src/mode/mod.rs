//! ModeManager / ModeStageMachine.
//!
//! Grounded on `execution_engine/preconditions.rs`'s precondition-gated
//! transition shape, generalized here to the (Mode, Stage) vocabulary.

use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus, EventPayload, EventType, Mode, Stage};

/// Tracks the (Mode, Stage) tuple for one task, emitting transitions and
/// rejecting illegal moves.
pub struct ModeManager {
    task_id: String,
    mode: Mode,
    stage: Stage,
}

/// Tool gating table: only specific (mode, stage) pairs admit certain
/// tools. Centralized here so both the
/// AgenticLoop and CommandPhase can consult the same rule.
pub fn tool_admitted(mode: Mode, stage: Stage, tool: &str) -> bool {
    match (mode, stage) {
        // ANSWER mode never runs mutating tools.
        (Mode::Answer, _) => matches!(tool, "read_file" | "search" | "answer"),
        (Mode::Plan, Stage::Plan) | (Mode::Plan, Stage::Retrieve) => {
            matches!(tool, "read_file" | "search" | "plan")
        }
        (Mode::Plan, _) => false,
        (Mode::Mission, Stage::Edit) => {
            matches!(tool, "read_file" | "search" | "edit" | "llm_edit")
        }
        (Mode::Mission, Stage::Command) => matches!(tool, "run_command"),
        (Mode::Mission, Stage::Test) => matches!(tool, "run_command" | "read_file"),
        (Mode::Mission, Stage::Repair) => matches!(tool, "read_file" | "edit" | "llm_edit"),
        (Mode::Mission, Stage::Retrieve) => matches!(tool, "read_file" | "search"),
        (Mode::Mission, Stage::Plan) => matches!(tool, "read_file" | "search" | "plan"),
        (Mode::Mission, Stage::None) => false,
    }
}

/// Only MISSION mode may enter autonomy.
pub fn mode_admits_autonomy(mode: Mode) -> bool {
    matches!(mode, Mode::Mission)
}

impl ModeManager {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            mode: Mode::Answer,
            stage: Stage::None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Transition mode, emitting `mode_changed {from, to}`.
    pub fn set_mode(&mut self, bus: &EventBus, new_mode: Mode) -> CoreResult<Event> {
        let from = self.mode;
        self.mode = new_mode;
        let payload = EventPayload::new()
            .insert("from", from.to_string())
            .insert("to", new_mode.to_string());
        bus.emit(
            &self.task_id,
            EventType::ModeChanged,
            new_mode,
            self.stage,
            payload,
            vec![],
            None,
        )
        .map_err(|e| CoreError::PersistenceError(e.to_string()))
    }

    /// Transition stage, emitting `stage_changed {from, to}`.
    pub fn set_stage(&mut self, bus: &EventBus, new_stage: Stage) -> CoreResult<Event> {
        let from = self.stage;
        self.stage = new_stage;
        let payload = EventPayload::new()
            .insert("from", from.to_string())
            .insert("to", new_stage.to_string());
        bus.emit(
            &self.task_id,
            EventType::StageChanged,
            self.mode,
            new_stage,
            payload,
            vec![],
            None,
        )
        .map_err(|e| CoreError::PersistenceError(e.to_string()))
    }

    pub fn check_tool_admitted(&self, tool: &str) -> CoreResult<()> {
        if tool_admitted(self.mode, self.stage, tool) {
            Ok(())
        } else {
            Err(CoreError::ModeViolation(format!(
                "tool '{tool}' not admitted in mode={} stage={}",
                self.mode, self.stage
            )))
        }
    }
}
