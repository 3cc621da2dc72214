//! ScaffoldFlowCoordinator: event-sourced multi-step
//! decision flow for greenfield project creation.
//!
//! Generalizes `execution_engine/tool_router.rs`'s rule-driven
//! destination lookup into a pure reducer over a stored event sequence,
//! the way  requires replay to reconstruct state deterministically.

use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus, EventPayload, EventType, Mode, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaffoldFlowState {
    NotStarted,
    Started,
    ProposalCreated { design_pack: String },
    AwaitingDecision { design_pack: String },
    Completed { status: CompletionStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    ReadyForStep35_2,
    Cancelled,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::ReadyForStep35_2 => "ready_for_step_35_2",
            CompletionStatus::Cancelled => "cancelled",
        }
    }
}

/// "User actions {proceed, cancel, change_style} map to
/// completion statuses {ready_for_step_35_2, cancelled, cancelled}."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Proceed,
    Cancel,
    ChangeStyle,
}

/// Pure reducer: identical event sequences always yield identical state
///. Unrecognized/out-of-order events are ignored rather
/// than causing a panic, since a replaying caller may hand this a
/// superset of the task's full event log.
pub fn derive_scaffold_flow_state(events: &[Event]) -> ScaffoldFlowState {
    let mut state = ScaffoldFlowState::NotStarted;
    for event in events {
        state = match (&state, event.event_type) {
            (ScaffoldFlowState::NotStarted, EventType::ScaffoldStarted) => ScaffoldFlowState::Started,
            (ScaffoldFlowState::Started, EventType::ScaffoldProposalCreated)
            | (ScaffoldFlowState::AwaitingDecision { .. }, EventType::ScaffoldProposalCreated) => {
                let design_pack = event
                    .payload
                    .get("design_pack")
                    .and_then(|v| v.as_str())
                    .unwrap_or("default")
                    .to_string();
                ScaffoldFlowState::ProposalCreated { design_pack }
            }
            (ScaffoldFlowState::ProposalCreated { design_pack }, EventType::ScaffoldDecisionRequested) => {
                ScaffoldFlowState::AwaitingDecision {
                    design_pack: design_pack.clone(),
                }
            }
            (ScaffoldFlowState::AwaitingDecision { .. }, EventType::ScaffoldCompleted) => {
                let status = event
                    .payload
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("cancelled");
                let status = if status == CompletionStatus::ReadyForStep35_2.as_str() {
                    CompletionStatus::ReadyForStep35_2
                } else {
                    CompletionStatus::Cancelled
                };
                ScaffoldFlowState::Completed { status }
            }
            (other, _) => other.clone(),
        };
    }
    state
}

/// Design packs offered when a user asks to change the proposed style
///. [AMBIENT] kept as a closed, stable list rather than
/// pluggable — adding a pack is a crate change, not a runtime one.
pub const AVAILABLE_DESIGN_PACKS: &[&str] = &["minimal", "standard", "batteries_included"];

/// Drives the flow's emitted transitions. Replay/state-derivation lives
/// in [`derive_scaffold_flow_state`]; this type only knows how to emit
/// the next legal event given the coordinator's current (derived) state.
pub struct ScaffoldFlowCoordinator<'a> {
    bus: &'a EventBus,
}

impl<'a> ScaffoldFlowCoordinator<'a> {
    pub fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    fn current_state(&self, task_id: &str) -> CoreResult<ScaffoldFlowState> {
        let events: Vec<Event> = self
            .bus
            .store()
            .read_all()?
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .collect();
        Ok(derive_scaffold_flow_state(&events))
    }

    pub fn start(&self, task_id: &str, mode: Mode, stage: Stage) -> CoreResult<()> {
        self.bus
            .emit(task_id, EventType::ScaffoldStarted, mode, stage, EventPayload::new(), vec![], None)?;
        Ok(())
    }

    pub fn propose(&self, task_id: &str, mode: Mode, stage: Stage, design_pack: &str) -> CoreResult<()> {
        self.bus.emit(
            task_id,
            EventType::ScaffoldProposalCreated,
            mode,
            stage,
            EventPayload::new().insert("design_pack", design_pack),
            vec![],
            None,
        )?;
        self.bus.emit(
            task_id,
            EventType::ScaffoldDecisionRequested,
            mode,
            stage,
            EventPayload::new(),
            vec![],
            None,
        )?;
        Ok(())
    }

    /// "When style is changed, a `style_selection_requested`
    /// event is emitted with the set of available design packs; selection
    /// re-emits proposal with the chosen pack and re-arms the decision."
    pub fn resolve_decision(
        &self,
        task_id: &str,
        mode: Mode,
        stage: Stage,
        action: UserAction,
        new_design_pack: Option<&str>,
    ) -> CoreResult<ScaffoldFlowState> {
        let state = self.current_state(task_id)?;
        if !matches!(state, ScaffoldFlowState::AwaitingDecision { .. }) {
            return Err(CoreError::Validation(
                "scaffold decision can only be resolved while awaiting a decision".to_string(),
            ));
        }

        self.bus.emit(
            task_id,
            EventType::ScaffoldDecisionResolved,
            mode,
            stage,
            EventPayload::new().insert(
                "action",
                match action {
                    UserAction::Proceed => "proceed",
                    UserAction::Cancel => "cancel",
                    UserAction::ChangeStyle => "change_style",
                },
            ),
            vec![],
            None,
        )?;

        match action {
            UserAction::Proceed => {
                self.bus.emit(
                    task_id,
                    EventType::ScaffoldCompleted,
                    mode,
                    stage,
                    EventPayload::new().insert("status", CompletionStatus::ReadyForStep35_2.as_str()),
                    vec![],
                    None,
                )?;
            }
            UserAction::Cancel => {
                self.bus.emit(
                    task_id,
                    EventType::ScaffoldCompleted,
                    mode,
                    stage,
                    EventPayload::new().insert("status", CompletionStatus::Cancelled.as_str()),
                    vec![],
                    None,
                )?;
            }
            UserAction::ChangeStyle => {
                self.bus.emit(
                    task_id,
                    EventType::ScaffoldDecisionRequested,
                    mode,
                    stage,
                    EventPayload::new()
                        .insert("style_selection_requested", true)
                        .insert("available_design_packs", serde_json::json!(AVAILABLE_DESIGN_PACKS)),
                    vec![],
                    None,
                )?;
                let pack = new_design_pack.unwrap_or("standard");
                self.propose(task_id, mode, stage, pack)?;
            }
        }

        self.current_state(task_id)
    }
}
