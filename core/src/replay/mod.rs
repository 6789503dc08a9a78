//! Replay: re-execute a recorded run against its own artifacts.
//!
//! Three cooperating pieces:
//!
//! - [`mode`] — an ambient, dynamically-scoped flag that forbids live
//!   external calls while a recording is being re-executed.
//! - [`context`] — a cursor-based oracle that feeds recorded events back to
//!   re-executing code in strict order.
//! - [`engine`] — orchestration: artifact verification, executor-driven
//!   replay, and run-against-run comparison, halting at the first
//!   divergence.

pub mod context;
pub mod engine;
pub mod mode;

pub use context::ReplayContext;
pub use engine::{
    ExecutorError, ReplayEngine, ReplayPolicy, ReplayResult, ReplayStatus, ReplayStepResult,
    StepExecutor,
};
pub use mode::{
    current_replay_run_id, guard_live_call, is_replay_mode_active, replay_mode, ReplayModeGuard,
};

/// The piece of a recording that was expected but absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// No such run.
    Run,
    /// The run has no steps.
    Steps,
    /// A step has no events.
    Events,
    /// No step exists at the requested index.
    Step,
    /// The cursor ran past the last event of a step.
    Event,
    /// A `tool_call` event carries no `result` field.
    ToolResult,
    /// An `llm_call` event carries an empty payload.
    ModelPayload,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Steps => "steps",
            Self::Events => "events",
            Self::Step => "step",
            Self::Event => "event",
            Self::ToolResult => "tool_result",
            Self::ModelPayload => "model_payload",
        }
    }
}

/// Typed replay failure.
///
/// Every message carries the run id (when known), the step index, and a
/// short category tag, in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// A required piece of the recorded run is absent.
    MissingArtifact {
        run_id: String,
        step_idx: usize,
        event_idx: Option<usize>,
        kind: ArtifactKind,
    },
    /// A live external call was attempted inside a replay-mode scope.
    DeterminismViolation {
        run_id: String,
        op_name: String,
        subtype: &'static str,
    },
    /// The oracle was asked for the next event of a type that did not match
    /// the event at the cursor.
    OutOfOrderEvent {
        run_id: String,
        step_idx: usize,
        expected_type: String,
        actual_type: String,
    },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingArtifact {
                run_id,
                step_idx,
                event_idx,
                kind,
            } => match event_idx {
                Some(event_idx) => write!(
                    f,
                    "{run_id} step {step_idx}: missing_artifact: no {} at event {event_idx}",
                    kind.as_str()
                ),
                None => write!(
                    f,
                    "{run_id} step {step_idx}: missing_artifact: no {}",
                    kind.as_str()
                ),
            },
            Self::DeterminismViolation {
                run_id,
                op_name,
                subtype,
            } => write!(
                f,
                "{run_id}: determinism_violation ({subtype}): live call '{op_name}' attempted \
                 during replay; recorded artifacts must be used instead"
            ),
            Self::OutOfOrderEvent {
                run_id,
                step_idx,
                expected_type,
                actual_type,
            } => write!(
                f,
                "{run_id} step {step_idx}: replay_order: expected next event of type \
                 '{expected_type}', cursor is at '{actual_type}'"
            ),
        }
    }
}

impl std::error::Error for ReplayError {}
