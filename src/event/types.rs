//! Event data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mode ∈ {ANSWER, PLAN, MISSION}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Answer,
    Plan,
    Mission,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Answer => write!(f, "ANSWER"),
            Mode::Plan => write!(f, "PLAN"),
            Mode::Mission => write!(f, "MISSION"),
        }
    }
}

/// Stage ∈ {none, plan, retrieve, edit, test, repair, command}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    None,
    Plan,
    Retrieve,
    Edit,
    Test,
    Repair,
    Command,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::None => "none",
            Stage::Plan => "plan",
            Stage::Retrieve => "retrieve",
            Stage::Edit => "edit",
            Stage::Test => "test",
            Stage::Repair => "repair",
            Stage::Command => "command",
        };
        write!(f, "{s}")
    }
}

/// Canonical, closed set of stored event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IntentReceived,
    ModeChanged,
    StageChanged,
    PlanCreated,
    PlanRevised,
    ApprovalRequested,
    ApprovalResolved,
    DiffProposed,
    DiffApplied,
    CheckpointCreated,
    CheckpointRestored,
    ToolStart,
    ToolEnd,
    StreamDelta,
    StreamComplete,
    ModelFallbackUsed,
    AutonomyStarted,
    AutonomyHalted,
    AutonomyCompleted,
    IterationStarted,
    IterationSucceeded,
    IterationFailed,
    BudgetExhausted,
    RepairAttempted,
    ExecutionPaused,
    ExecutionResumed,
    ScaffoldStarted,
    ScaffoldProposalCreated,
    ScaffoldDecisionRequested,
    ScaffoldDecisionResolved,
    ScaffoldCompleted,
    CommandProposed,
    CommandStarted,
    CommandProgress,
    CommandCompleted,
    DecisionPointNeeded,
    FailureDetected,
    Final,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::IntentReceived => "intent_received",
            EventType::ModeChanged => "mode_changed",
            EventType::StageChanged => "stage_changed",
            EventType::PlanCreated => "plan_created",
            EventType::PlanRevised => "plan_revised",
            EventType::ApprovalRequested => "approval_requested",
            EventType::ApprovalResolved => "approval_resolved",
            EventType::DiffProposed => "diff_proposed",
            EventType::DiffApplied => "diff_applied",
            EventType::CheckpointCreated => "checkpoint_created",
            EventType::CheckpointRestored => "checkpoint_restored",
            EventType::ToolStart => "tool_start",
            EventType::ToolEnd => "tool_end",
            EventType::StreamDelta => "stream_delta",
            EventType::StreamComplete => "stream_complete",
            EventType::ModelFallbackUsed => "model_fallback_used",
            EventType::AutonomyStarted => "autonomy_started",
            EventType::AutonomyHalted => "autonomy_halted",
            EventType::AutonomyCompleted => "autonomy_completed",
            EventType::IterationStarted => "iteration_started",
            EventType::IterationSucceeded => "iteration_succeeded",
            EventType::IterationFailed => "iteration_failed",
            EventType::BudgetExhausted => "budget_exhausted",
            EventType::RepairAttempted => "repair_attempted",
            EventType::ExecutionPaused => "execution_paused",
            EventType::ExecutionResumed => "execution_resumed",
            EventType::ScaffoldStarted => "scaffold_started",
            EventType::ScaffoldProposalCreated => "scaffold_proposal_created",
            EventType::ScaffoldDecisionRequested => "scaffold_decision_requested",
            EventType::ScaffoldDecisionResolved => "scaffold_decision_resolved",
            EventType::ScaffoldCompleted => "scaffold_completed",
            EventType::CommandProposed => "command_proposed",
            EventType::CommandStarted => "command_started",
            EventType::CommandProgress => "command_progress",
            EventType::CommandCompleted => "command_completed",
            EventType::DecisionPointNeeded => "decision_point_needed",
            EventType::FailureDetected => "failure_detected",
            EventType::Final => "final",
        }
    }

    /// UI-visible ordering tier, derived not stored.
    pub fn tier(&self) -> EventTier {
        use EventType::*;
        match self {
            IntentReceived | PlanCreated | PlanRevised | ApprovalRequested | ApprovalResolved
            | DiffProposed | DiffApplied | FailureDetected | DecisionPointNeeded | Final
            | ScaffoldStarted | ScaffoldCompleted => EventTier::User,

            IterationStarted | IterationSucceeded | IterationFailed | ToolStart | ToolEnd
            | CommandStarted | CommandProgress | CommandCompleted | RepairAttempted
            | ScaffoldProposalCreated | ScaffoldDecisionRequested | ScaffoldDecisionResolved
            | CommandProposed => EventTier::Progress,

            ModeChanged | StageChanged | CheckpointCreated | CheckpointRestored | StreamDelta
            | StreamComplete | ModelFallbackUsed | AutonomyStarted | AutonomyHalted
            | AutonomyCompleted | BudgetExhausted | ExecutionPaused | ExecutionResumed => {
                EventTier::System
            }
        }
    }
}

/// Derived, not-stored ordering tier for UI rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTier {
    User,
    Progress,
    System,
}

/// Event payload as a tagged sum over known event types, with an
/// `Unknown` arm for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Known(BTreeMap<String, serde_json::Value>),
    Unknown(serde_json::Map<String, serde_json::Value>),
}

impl Default for EventPayload {
    fn default() -> Self {
        EventPayload::Known(BTreeMap::new())
    }
}

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        match &mut self {
            EventPayload::Known(map) => {
                map.insert(key.into(), value.into());
            }
            EventPayload::Unknown(map) => {
                map.insert(key.into(), value.into());
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            EventPayload::Known(map) => map.get(key),
            EventPayload::Unknown(map) => map.get(key),
        }
    }

    /// Embed a broader "primitive" event descriptor for replay
    /// normalization.
    pub fn with_primitive(mut self, primitive: &str) -> Self {
        self = self.insert("_primitive", serde_json::Value::String(primitive.to_string()));
        self
    }
}

/// An immutable, append-only journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub task_id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub mode: Mode,
    pub stage: Stage,
    #[serde(default)]
    pub payload: EventPayload,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
}

impl Event {
    pub fn tier(&self) -> EventTier {
        self.event_type.tier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_serde() {
        let s = serde_json::to_string(&EventType::DiffApplied).unwrap();
        assert_eq!(s, "\"diff_applied\"");
        let back: EventType = serde_json::from_str(&s).unwrap();
        assert_eq!(back.as_str(), "diff_applied");
    }

    #[test]
    fn payload_insert_and_get() {
        let p = EventPayload::new().insert("foo", 1).insert("bar", "baz");
        assert_eq!(p.get("foo").unwrap(), &serde_json::json!(1));
        assert_eq!(p.get("bar").unwrap(), &serde_json::json!("baz"));
    }

    #[test]
    fn tiers_partition_event_types() {
        assert_eq!(EventType::IntentReceived.tier(), EventTier::User);
        assert_eq!(EventType::ToolStart.tier(), EventTier::Progress);
        assert_eq!(EventType::ModeChanged.tier(), EventTier::System);
    }
}
