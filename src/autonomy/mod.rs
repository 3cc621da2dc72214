//! AutonomyController: drives MISSION-mode unattended
//! iteration with a checkpoint-first, budget-gated state machine.
//!
//! Grounded on `execution_engine/circuit_breaker.rs`'s explicit state
//! machine shape (closed/open/half-open, generalized here to
//! running/paused/budget_exhausted/halted) and `execution_engine/
//! execution_budget.rs::ToolBudgetTracker`'s remaining/exhausted
//! accounting, generalized from tool-call counts to the three budgets
//! tracked here: iterations, tool calls, wall time.

use crate::checkpoint::CheckpointManager;
use crate::error::{CoreError, CoreResult};
use crate::event::{EventBus, EventPayload, EventType, Mode, Stage};
use crate::ids::monotonic_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutonomyState {
    Idle,
    Running,
    Paused,
    BudgetExhausted,
    Halted,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedBudget {
    Iterations,
    ToolCalls,
    WallTime,
}

impl ExhaustedBudget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExhaustedBudget::Iterations => "iterations",
            ExhaustedBudget::ToolCalls => "tool_calls",
            ExhaustedBudget::WallTime => "wall_time",
        }
    }
}

/// Preconditions required to start MISSION autonomy.
#[derive(Debug, Clone, Copy)]
pub struct AutonomyPreconditions {
    pub mode_is_mission: bool,
    pub plan_approved: bool,
    pub tools_approved: bool,
}

impl AutonomyPreconditions {
    fn all_hold(&self) -> bool {
        self.mode_is_mission && self.plan_approved && self.tools_approved
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AutonomyBudgets {
    pub max_iterations: u32,
    pub max_tool_calls: u32,
    pub max_wall_millis: u64,
}

/// Result a caller's iteration body returns to `executeIteration`.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub success: bool,
    pub failure_reason: Option<String>,
    pub evidence_ids: Vec<String>,
}

impl IterationResult {
    pub fn success(evidence_ids: Vec<String>) -> Self {
        Self {
            success: true,
            failure_reason: None,
            evidence_ids,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            evidence_ids: vec![],
        }
    }
}

/// Drives one MISSION run's checkpoint-first iteration loop.
pub struct AutonomyController<'a, 'c> {
    bus: &'a EventBus,
    checkpoints: &'a mut CheckpointManager<'c>,
    task_id: String,
    starting_mode: Mode,
    budgets: AutonomyBudgets,
    state: AutonomyState,
    iterations_used: u32,
    tool_calls_used: u32,
    started_at_millis: u64,
}

impl<'a, 'c> AutonomyController<'a, 'c> {
    pub fn new(
        bus: &'a EventBus,
        checkpoints: &'a mut CheckpointManager<'c>,
        task_id: impl Into<String>,
        starting_mode: Mode,
        budgets: AutonomyBudgets,
    ) -> Self {
        Self {
            bus,
            checkpoints,
            task_id: task_id.into(),
            starting_mode,
            budgets,
            state: AutonomyState::Idle,
            iterations_used: 0,
            tool_calls_used: 0,
            started_at_millis: 0,
        }
    }

    pub fn state(&self) -> AutonomyState {
        self.state
    }

    /// `startAutonomy` fails unless all three preconditions
    /// hold.
    pub fn start_autonomy(&mut self, preconditions: AutonomyPreconditions) -> CoreResult<()> {
        if !preconditions.all_hold() {
            return Err(CoreError::ModeViolation(
                "autonomy preconditions not satisfied: mode=MISSION, plan approved, tools approved are all required".to_string(),
            ));
        }
        self.started_at_millis = monotonic_millis();
        self.state = AutonomyState::Running;
        self.bus.emit(
            &self.task_id,
            EventType::AutonomyStarted,
            self.starting_mode,
            Stage::None,
            EventPayload::new(),
            vec![],
            None,
        )?;
        Ok(())
    }

    fn budgets_remaining(&self) -> serde_json::Value {
        serde_json::json!({
            "iterations": self.budgets.max_iterations.saturating_sub(self.iterations_used),
            "tool_calls": self.budgets.max_tool_calls.saturating_sub(self.tool_calls_used),
            "wall_millis": self.budgets.max_wall_millis.saturating_sub(
                monotonic_millis().saturating_sub(self.started_at_millis),
            ),
        })
    }

    fn exhausted_budget(&self) -> Option<ExhaustedBudget> {
        if self.iterations_used >= self.budgets.max_iterations {
            return Some(ExhaustedBudget::Iterations);
        }
        if self.tool_calls_used >= self.budgets.max_tool_calls {
            return Some(ExhaustedBudget::ToolCalls);
        }
        let elapsed = monotonic_millis().saturating_sub(self.started_at_millis);
        if elapsed >= self.budgets.max_wall_millis {
            return Some(ExhaustedBudget::WallTime);
        }
        None
    }

    /// `executeIteration`: checkpoint-first, then
    /// `iteration_started` → body → `iteration_succeeded`/`iteration_failed`.
    /// `tool_calls_in_iteration` feeds the tool-call budget; the caller
    /// reports how many tool calls its body actually made.
    pub fn execute_iteration<F>(
        &mut self,
        mode: Mode,
        stage: Stage,
        checkpoint_description: &str,
        checkpoint_paths: &[String],
        tool_calls_in_iteration: u32,
        body: F,
    ) -> CoreResult<IterationResult>
    where
        F: FnOnce() -> IterationResult,
    {
        if self.state != AutonomyState::Running {
            return Err(CoreError::ModeViolation(format!(
                "cannot execute iteration while autonomy state is not Running (current: {:?})",
                self.state
            )));
        }

        if let Some(exhausted) = self.exhausted_budget() {
            self.state = AutonomyState::BudgetExhausted;
            self.bus.emit(
                &self.task_id,
                EventType::BudgetExhausted,
                mode,
                stage,
                EventPayload::new().insert("exhausted_budget", exhausted.as_str()),
                vec![],
                None,
            )?;
            return Ok(IterationResult::failure(format!(
                "budget exhausted: {}",
                exhausted.as_str()
            )));
        }

        self.checkpoints.create_checkpoint(
            &self.task_id,
            mode,
            stage,
            checkpoint_description,
            checkpoint_paths,
            "snapshot",
        )?;

        self.bus.emit(
            &self.task_id,
            EventType::IterationStarted,
            mode,
            stage,
            EventPayload::new().insert("budgets_remaining", self.budgets_remaining()),
            vec![],
            None,
        )?;

        let result = body();
        self.iterations_used += 1;
        self.tool_calls_used += tool_calls_in_iteration;

        if result.success {
            self.bus.emit(
                &self.task_id,
                EventType::IterationSucceeded,
                mode,
                stage,
                EventPayload::new().insert("evidence_ids", serde_json::json!(result.evidence_ids)),
                result.evidence_ids.clone(),
                None,
            )?;
        } else {
            self.bus.emit(
                &self.task_id,
                EventType::IterationFailed,
                mode,
                stage,
                EventPayload::new().insert(
                    "failure_reason",
                    result.failure_reason.clone().unwrap_or_default(),
                ),
                vec![],
                None,
            )?;
        }

        Ok(result)
    }

    /// `checkModeChange`: halts if `newMode` differs from
    /// the mode autonomy started in.
    pub fn check_mode_change(&mut self, new_mode: Mode, new_stage: Stage) -> CoreResult<()> {
        if new_mode != self.starting_mode {
            self.state = AutonomyState::Halted;
            self.bus.emit(
                &self.task_id,
                EventType::AutonomyHalted,
                new_mode,
                new_stage,
                EventPayload::new().insert(
                    "reason",
                    format!("mode changed from {} to {}", self.starting_mode, new_mode),
                ),
                vec![],
                None,
            )?;
        }
        Ok(())
    }

    pub fn pause(&mut self, mode: Mode, stage: Stage) -> CoreResult<()> {
        if self.state != AutonomyState::Running {
            return Err(CoreError::ModeViolation(
                "can only pause a running autonomy session".to_string(),
            ));
        }
        self.state = AutonomyState::Paused;
        self.bus.emit(
            &self.task_id,
            EventType::ExecutionPaused,
            mode,
            stage,
            EventPayload::new(),
            vec![],
            None,
        )?;
        Ok(())
    }

    /// "resume requires previous state `paused`."
    pub fn resume(&mut self, mode: Mode, stage: Stage) -> CoreResult<()> {
        if self.state != AutonomyState::Paused {
            return Err(CoreError::ModeViolation(
                "can only resume a paused autonomy session".to_string(),
            ));
        }
        self.state = AutonomyState::Running;
        self.bus.emit(
            &self.task_id,
            EventType::ExecutionResumed,
            mode,
            stage,
            EventPayload::new(),
            vec![],
            None,
        )?;
        Ok(())
    }

    pub fn halt(&mut self, mode: Mode, stage: Stage, reason: &str) -> CoreResult<()> {
        self.state = AutonomyState::Halted;
        self.bus.emit(
            &self.task_id,
            EventType::AutonomyHalted,
            mode,
            stage,
            EventPayload::new().insert("reason", reason),
            vec![],
            None,
        )?;
        Ok(())
    }

    pub fn complete(&mut self, mode: Mode, stage: Stage) -> CoreResult<()> {
        self.state = AutonomyState::Completed;
        self.bus.emit(
            &self.task_id,
            EventType::AutonomyCompleted,
            mode,
            stage,
            EventPayload::new(),
            vec![],
            None,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStore;
    use crate::ids::{FixedClock, SequentialIds};
    use tempfile::tempdir;

    fn harness() -> (tempfile::TempDir, EventBus, FixedClock, SequentialIds) {
        let dir = tempdir().unwrap();
        let store = EventStore::with_providers(
            dir.path().join(".missioncore").join("events.jsonl"),
            Box::new(FixedClock::new(1)),
            Box::new(SequentialIds::new()),
        )
        .unwrap();
        (dir, EventBus::new(store), FixedClock::new(1000), SequentialIds::new())
    }

    fn full_preconditions() -> AutonomyPreconditions {
        AutonomyPreconditions {
            mode_is_mission: true,
            plan_approved: true,
            tools_approved: true,
        }
    }

    #[test]
    fn start_fails_unless_all_preconditions_hold() {
        let (dir, bus, clock, ids) = harness();
        let mut checkpoints = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
        let mut controller = AutonomyController::new(
            &bus,
            &mut checkpoints,
            "t1",
            Mode::Mission,
            AutonomyBudgets {
                max_iterations: 10,
                max_tool_calls: 50,
                max_wall_millis: 60_000,
            },
        );

        let result = controller.start_autonomy(AutonomyPreconditions {
            mode_is_mission: true,
            plan_approved: false,
            tools_approved: true,
        });
        assert!(result.is_err());
        assert_eq!(controller.state(), AutonomyState::Idle);
    }

    #[test]
    fn execute_iteration_checkpoints_first_then_emits_started_and_succeeded() {
        let (dir, bus, clock, ids) = harness();
        std::fs::write(dir.path().join("a.rs"), "v1").unwrap();
        let mut checkpoints = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
        let mut controller = AutonomyController::new(
            &bus,
            &mut checkpoints,
            "t1",
            Mode::Mission,
            AutonomyBudgets {
                max_iterations: 10,
                max_tool_calls: 50,
                max_wall_millis: 60_000,
            },
        );
        controller.start_autonomy(full_preconditions()).unwrap();

        let result = controller
            .execute_iteration(
                Mode::Mission,
                Stage::Edit,
                "edit a.rs",
                &["a.rs".to_string()],
                1,
                || IterationResult::success(vec!["ev_1".to_string()]),
            )
            .unwrap();

        assert!(result.success);
        let events = bus.store().read_all().unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::CheckpointCreated));
        assert!(events.iter().any(|e| e.event_type == EventType::IterationStarted));
        assert!(events.iter().any(|e| e.event_type == EventType::IterationSucceeded));
    }

    #[test]
    fn iteration_budget_exhaustion_halts_with_event() {
        let (dir, bus, clock, ids) = harness();
        let mut checkpoints = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
        let mut controller = AutonomyController::new(
            &bus,
            &mut checkpoints,
            "t1",
            Mode::Mission,
            AutonomyBudgets {
                max_iterations: 1,
                max_tool_calls: 50,
                max_wall_millis: 60_000,
            },
        );
        controller.start_autonomy(full_preconditions()).unwrap();

        controller
            .execute_iteration(Mode::Mission, Stage::Edit, "step", &[], 0, || {
                IterationResult::success(vec![])
            })
            .unwrap();

        let result = controller
            .execute_iteration(Mode::Mission, Stage::Edit, "step2", &[], 0, || {
                IterationResult::success(vec![])
            })
            .unwrap();

        assert!(!result.success);
        assert_eq!(controller.state(), AutonomyState::BudgetExhausted);
        let events = bus.store().read_all().unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::BudgetExhausted));
    }

    #[test]
    fn mode_change_halts_autonomy() {
        let (dir, bus, clock, ids) = harness();
        let mut checkpoints = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
        let mut controller = AutonomyController::new(
            &bus,
            &mut checkpoints,
            "t1",
            Mode::Mission,
            AutonomyBudgets {
                max_iterations: 10,
                max_tool_calls: 50,
                max_wall_millis: 60_000,
            },
        );
        controller.start_autonomy(full_preconditions()).unwrap();

        controller.check_mode_change(Mode::Plan, Stage::None).unwrap();
        assert_eq!(controller.state(), AutonomyState::Halted);
    }

    #[test]
    fn resume_requires_paused_state() {
        let (dir, bus, clock, ids) = harness();
        let mut checkpoints = CheckpointManager::new(dir.path(), &bus, &clock, &ids);
        let mut controller = AutonomyController::new(
            &bus,
            &mut checkpoints,
            "t1",
            Mode::Mission,
            AutonomyBudgets {
                max_iterations: 10,
                max_tool_calls: 50,
                max_wall_millis: 60_000,
            },
        );
        controller.start_autonomy(full_preconditions()).unwrap();

        assert!(controller.resume(Mode::Mission, Stage::None).is_err());

        controller.pause(Mode::Mission, Stage::None).unwrap();
        assert_eq!(controller.state(), AutonomyState::Paused);
        controller.resume(Mode::Mission, Stage::None).unwrap();
        assert_eq!(controller.state(), AutonomyState::Running);
    }
}
