//! Replay engine: orchestration over the oracle, the mode flag, and the
//! semantic comparator.
//!
//! Three entry points:
//!
//! - [`ReplayEngine::verify`] — artifact-presence pass over a recording,
//!   with no re-execution.
//! - [`ReplayEngine::replay_with`] — re-execute each recorded step through a
//!   caller-supplied executor under a replay-mode scope, comparing as it
//!   goes and halting at the first divergence.
//! - [`ReplayEngine::compare_recorded`] — compare a recording against an
//!   already-materialized replay run.

use std::collections::BTreeSet;

use crate::compare::{
    compare_steps, default_ignore_keys, DivergencePoint, DivergenceReason, FieldDiff,
};
use crate::model::{event_type, Run, Step};
use crate::value::Value;

use super::context::ReplayContext;
use super::mode::replay_mode;
use super::{ArtifactKind, ReplayError};

/// Overall replay status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    /// Initial state; never part of a finished result.
    Running,
    Match,
    Diverged,
    /// The replay was exhausted before the recording. Distinct from
    /// [`ReplayStatus::Diverged`].
    Incomplete,
    /// The executor itself failed while running a step.
    Error,
    OriginalNotFound,
    ReplayNotFound,
}

impl ReplayStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Match => "match",
            Self::Diverged => "diverged",
            Self::Incomplete => "incomplete",
            Self::Error => "error",
            Self::OriginalNotFound => "original_not_found",
            Self::ReplayNotFound => "replay_not_found",
        }
    }
}

impl std::fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy knobs for replay.
#[derive(Debug, Clone)]
pub struct ReplayPolicy {
    /// Raise [`ReplayError::MissingArtifact`] on absent artifacts instead of
    /// downgrading to a benign match.
    pub fail_on_missing_artifact: bool,
    /// Key names ignored during payload comparison.
    pub ignore_keys: BTreeSet<String>,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            fail_on_missing_artifact: true,
            ignore_keys: default_ignore_keys(),
        }
    }
}

/// Outcome of one re-executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStepResult {
    pub step_idx: usize,
    pub name: String,
    pub matched: bool,
}

/// Result of a replay operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayResult {
    pub status: ReplayStatus,
    pub run_id: String,
    /// Steps examined before the engine stopped.
    pub steps_compared: usize,
    pub divergence: Option<DivergencePoint>,
    pub message: Option<String>,
    pub step_results: Vec<ReplayStepResult>,
}

/// Failure raised by a step executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorError {
    pub message: String,
}

impl ExecutorError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecutorError {}

/// Re-executes one recorded step, reading recorded artifacts through the
/// oracle. Returning `Ok(None)` signals that the re-execution ended early
/// (the replay is incomplete).
pub trait StepExecutor {
    /// # Errors
    ///
    /// An [`ExecutorError`] terminates the replay with overall status
    /// [`ReplayStatus::Error`].
    fn execute_step(
        &mut self,
        recorded: &Step,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<Option<Step>, ExecutorError>;
}

impl<F> StepExecutor for F
where
    F: FnMut(&Step, &mut ReplayContext<'_>) -> Result<Option<Step>, ExecutorError>,
{
    fn execute_step(
        &mut self,
        recorded: &Step,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<Option<Step>, ExecutorError> {
        self(recorded, ctx)
    }
}

/// Deterministic replay of recorded runs.
#[derive(Debug, Clone, Default)]
pub struct ReplayEngine {
    policy: ReplayPolicy,
}

impl ReplayEngine {
    #[must_use]
    pub fn new(policy: ReplayPolicy) -> Self {
        Self { policy }
    }

    /// Verify that a recording carries every artifact replay would need:
    /// the run has steps, every step has events, every `tool_call` payload
    /// carries a `result` field, every `llm_call` payload is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::MissingArtifact`] for the first absence when
    /// the policy demands it; otherwise absences downgrade to a match.
    pub fn verify(&self, run: &Run) -> Result<ReplayResult, ReplayError> {
        match check_artifacts(run) {
            Err(error) if self.policy.fail_on_missing_artifact => Err(error),
            _ => Ok(ReplayResult {
                status: ReplayStatus::Match,
                run_id: run.run_id.clone(),
                steps_compared: run.steps.len(),
                divergence: None,
                message: None,
                step_results: run
                    .steps
                    .iter()
                    .map(|step| ReplayStepResult {
                        step_idx: step.idx,
                        name: step.name.clone(),
                        matched: true,
                    })
                    .collect(),
            }),
        }
    }

    /// Re-execute a recording step by step.
    ///
    /// Each recorded step is handed to the executor together with the
    /// oracle, inside a replay-mode scope bound to the run id. The returned
    /// step is compared against the recording; the engine halts at the
    /// first divergence.
    pub fn replay_with<E: StepExecutor>(&self, run: &Run, executor: &mut E) -> ReplayResult {
        let mut ctx = ReplayContext::new(run);
        let _scope = replay_mode(Some(&run.run_id));
        let mut step_results = Vec::new();

        for (i, recorded) in run.steps.iter().enumerate() {
            match executor.execute_step(recorded, &mut ctx) {
                Err(error) => {
                    return ReplayResult {
                        status: ReplayStatus::Error,
                        run_id: run.run_id.clone(),
                        steps_compared: i,
                        divergence: None,
                        message: Some(format!(
                            "{} step {}: error: {error}",
                            run.run_id, recorded.idx
                        )),
                        step_results,
                    };
                }
                Ok(None) => {
                    return ReplayResult {
                        status: ReplayStatus::Incomplete,
                        run_id: run.run_id.clone(),
                        steps_compared: i,
                        divergence: None,
                        message: Some(format!(
                            "{} step {}: incomplete: replay ended before the recording",
                            run.run_id, recorded.idx
                        )),
                        step_results,
                    };
                }
                Ok(Some(replayed)) => {
                    match compare_steps(recorded, &replayed, &self.policy.ignore_keys) {
                        Some(divergence) => {
                            step_results.push(ReplayStepResult {
                                step_idx: recorded.idx,
                                name: recorded.name.clone(),
                                matched: false,
                            });
                            return ReplayResult {
                                status: ReplayStatus::Diverged,
                                run_id: run.run_id.clone(),
                                steps_compared: i + 1,
                                divergence: Some(divergence),
                                message: None,
                                step_results,
                            };
                        }
                        None => step_results.push(ReplayStepResult {
                            step_idx: recorded.idx,
                            name: recorded.name.clone(),
                            matched: true,
                        }),
                    }
                }
            }
        }

        ReplayResult {
            status: ReplayStatus::Match,
            run_id: run.run_id.clone(),
            steps_compared: run.steps.len(),
            divergence: None,
            message: None,
            step_results,
        }
    }

    /// Compare a recording against an already-materialized replay run.
    ///
    /// Absent runs map to [`ReplayStatus::OriginalNotFound`] /
    /// [`ReplayStatus::ReplayNotFound`]. A replay exhausted before the
    /// recording is [`ReplayStatus::Incomplete`]; extra replayed steps are a
    /// divergence.
    #[must_use]
    pub fn compare_recorded(
        &self,
        original: Option<&Run>,
        replayed: Option<&Run>,
    ) -> ReplayResult {
        let run_id = original
            .or(replayed)
            .map_or_else(|| "unknown".to_string(), |run| run.run_id.clone());

        let Some(original) = original else {
            return not_found(ReplayStatus::OriginalNotFound, run_id);
        };
        let Some(replayed) = replayed else {
            return not_found(ReplayStatus::ReplayNotFound, run_id);
        };

        let mut step_results = Vec::new();
        for (i, recorded) in original.steps.iter().enumerate() {
            let Some(candidate) = replayed.steps.get(i) else {
                return ReplayResult {
                    status: ReplayStatus::Incomplete,
                    run_id: original.run_id.clone(),
                    steps_compared: i,
                    divergence: None,
                    message: Some(format!(
                        "{} step {}: incomplete: replay ended before the recording",
                        original.run_id, recorded.idx
                    )),
                    step_results,
                };
            };
            match compare_steps(recorded, candidate, &self.policy.ignore_keys) {
                Some(divergence) => {
                    step_results.push(ReplayStepResult {
                        step_idx: recorded.idx,
                        name: recorded.name.clone(),
                        matched: false,
                    });
                    return ReplayResult {
                        status: ReplayStatus::Diverged,
                        run_id: original.run_id.clone(),
                        steps_compared: i + 1,
                        divergence: Some(divergence),
                        message: None,
                        step_results,
                    };
                }
                None => step_results.push(ReplayStepResult {
                    step_idx: recorded.idx,
                    name: recorded.name.clone(),
                    matched: true,
                }),
            }
        }

        if replayed.steps.len() > original.steps.len() {
            let first_extra = &replayed.steps[original.steps.len()];
            return ReplayResult {
                status: ReplayStatus::Diverged,
                run_id: original.run_id.clone(),
                steps_compared: original.steps.len(),
                divergence: Some(DivergencePoint {
                    step_idx: original.steps.len(),
                    step_name: first_extra.name.clone(),
                    event_idx: None,
                    reason: DivergenceReason::StepCountMismatch,
                    field_diffs: vec![FieldDiff {
                        path: "steps.length".to_string(),
                        expected: original.steps.len().to_string(),
                        actual: replayed.steps.len().to_string(),
                    }],
                }),
                message: None,
                step_results,
            };
        }

        ReplayResult {
            status: ReplayStatus::Match,
            run_id: original.run_id.clone(),
            steps_compared: original.steps.len(),
            divergence: None,
            message: None,
            step_results,
        }
    }
}

fn not_found(status: ReplayStatus, run_id: String) -> ReplayResult {
    let message = format!("{run_id}: {}: no run to compare", status.as_str());
    ReplayResult {
        status,
        run_id,
        steps_compared: 0,
        divergence: None,
        message: Some(message),
        step_results: Vec::new(),
    }
}

fn check_artifacts(run: &Run) -> Result<(), ReplayError> {
    if run.steps.is_empty() {
        return Err(ReplayError::MissingArtifact {
            run_id: run.run_id.clone(),
            step_idx: 0,
            event_idx: None,
            kind: ArtifactKind::Steps,
        });
    }
    for step in &run.steps {
        if step.events.is_empty() {
            return Err(ReplayError::MissingArtifact {
                run_id: run.run_id.clone(),
                step_idx: step.idx,
                event_idx: None,
                kind: ArtifactKind::Events,
            });
        }
        for (event_idx, event) in step.events.iter().enumerate() {
            match event.event_type.as_str() {
                event_type::TOOL_CALL => {
                    if event.payload.get("result").is_none() {
                        return Err(ReplayError::MissingArtifact {
                            run_id: run.run_id.clone(),
                            step_idx: step.idx,
                            event_idx: Some(event_idx),
                            kind: ArtifactKind::ToolResult,
                        });
                    }
                }
                event_type::LLM_CALL => {
                    let empty = match &event.payload {
                        Value::Null => true,
                        Value::Map(entries) => entries.is_empty(),
                        _ => false,
                    };
                    if empty {
                        return Err(ReplayError::MissingArtifact {
                            run_id: run.run_id.clone(),
                            step_idx: step.idx,
                            event_idx: Some(event_idx),
                            kind: ArtifactKind::ModelPayload,
                        });
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}
