//! First-divergence engine: step-by-step comparison of two recorded runs.
//!
//! Compares two runs and returns the FIRST point of divergence with a
//! deterministic classification, explanation, and structured diffs.
//!
//! # Algorithm
//!
//! 1. Fast-path lockstep comparison until mismatch.
//! 2. On mismatch, attempt resync within a sliding window using soft step
//!    signatures (name + canonicalized input hash).
//! 3. If resync succeeds with a one-sided gap, classify as `missing_steps`
//!    or `extra_steps`. A two-sided gap is a replacement: fall through to
//!    step-local classification.
//! 4. Otherwise classify by what differs, in priority order:
//!    op > input > error > output.
//! 5. At most one divergence is reported per comparison; no step beyond the
//!    divergence site is examined.

use crate::canon::{canon, sha256_hex};
use crate::json_diff::{json_diff, DiffOp};
use crate::model::{event_type, Run, Step};
use crate::value::Value;

/// Classification of the first point of divergence between two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceStatus {
    ExactMatch,
    /// Step names differ.
    OpDivergence,
    /// Same name, different input events.
    InputDivergence,
    /// Error-event presence or error payloads differ.
    ErrorDivergence,
    /// Anything else differs within matched steps.
    OutputDivergence,
    /// Run A has steps absent in run B.
    MissingSteps,
    /// Run B has steps absent in run A.
    ExtraSteps,
}

impl DivergenceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::OpDivergence => "op_divergence",
            Self::InputDivergence => "input_divergence",
            Self::ErrorDivergence => "error_divergence",
            Self::OutputDivergence => "output_divergence",
            Self::MissingSteps => "missing_steps",
            Self::ExtraSteps => "extra_steps",
        }
    }
}

impl std::fmt::Display for DivergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which structured diffs to include in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowDiffs {
    Input,
    Output,
    #[default]
    Both,
}

impl ShowDiffs {
    fn includes_input(self) -> bool {
        matches!(self, Self::Input | Self::Both)
    }

    fn includes_output(self) -> bool {
        matches!(self, Self::Output | Self::Both)
    }
}

/// Tuning knobs for [`find_first_divergence`].
#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    /// Resync lookahead, in steps.
    pub window: usize,
    /// Steps of context on each side of the divergence.
    pub context_size: usize,
    /// Which diffs to include.
    pub show: ShowDiffs,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            window: 10,
            context_size: 2,
            show: ShowDiffs::Both,
        }
    }
}

/// Compact summary of a step for inclusion in diff results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub idx: usize,
    pub name: String,
    pub input_hash: String,
    pub output_hash: String,
    pub event_count: usize,
    pub has_error: bool,
}

impl StepSummary {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "idx": self.idx,
            "name": self.name,
            "input_hash": self.input_hash,
            "output_hash": self.output_hash,
            "event_count": self.event_count,
            "has_error": self.has_error,
        })
    }
}

/// Result of first-divergence comparison between two runs.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstDivergenceResult {
    pub status: DivergenceStatus,
    pub idx_a: Option<usize>,
    pub idx_b: Option<usize>,
    /// Deterministic one-line template per status.
    pub explanation: String,
    pub old_step: Option<StepSummary>,
    pub new_step: Option<StepSummary>,
    pub input_diff: Option<Vec<DiffOp>>,
    pub output_diff: Option<Vec<DiffOp>>,
    /// Index of the last step that compared equal, `-1` if none did.
    pub last_equal_idx: i64,
    pub context_a: Vec<StepSummary>,
    pub context_b: Vec<StepSummary>,
}

impl FirstDivergenceResult {
    /// Serialize as the fixed-key wire record. Serializing this value
    /// through the canonicalizer is byte-stable across processes.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let summary = |s: &Option<StepSummary>| {
            s.as_ref()
                .map_or(serde_json::Value::Null, StepSummary::to_json)
        };
        let diff = |d: &Option<Vec<DiffOp>>| {
            d.as_ref().map_or(serde_json::Value::Null, |ops| {
                serde_json::Value::Array(ops.iter().map(DiffOp::to_json).collect())
            })
        };
        serde_json::json!({
            "status": self.status.as_str(),
            "idx_a": self.idx_a,
            "idx_b": self.idx_b,
            "explanation": self.explanation,
            "last_equal_idx": self.last_equal_idx,
            "old_step": summary(&self.old_step),
            "new_step": summary(&self.new_step),
            "input_diff": diff(&self.input_diff),
            "output_diff": diff(&self.output_diff),
            "context_a": self.context_a.iter().map(StepSummary::to_json).collect::<Vec<_>>(),
            "context_b": self.context_b.iter().map(StepSummary::to_json).collect::<Vec<_>>(),
        })
    }
}

// ---------------------------------------------------------------------------
// Step helpers
// ---------------------------------------------------------------------------

fn payloads_of_type(step: &Step, tag: &str) -> Value {
    Value::Seq(
        step.events_of_type(tag)
            .map(|event| event.payload.clone())
            .collect(),
    )
}

fn input_hash(step: &Step) -> String {
    sha256_hex(&canon(&payloads_of_type(step, event_type::INPUT)))
}

fn output_hash(step: &Step) -> String {
    sha256_hex(&canon(&payloads_of_type(step, event_type::OUTPUT)))
}

/// Soft signature for resync: `(name, input_hash)`.
fn signature(step: &Step) -> (String, String) {
    (step.name.clone(), input_hash(step))
}

fn make_summary(step: &Step) -> StepSummary {
    StepSummary {
        idx: step.idx,
        name: step.name.clone(),
        input_hash: input_hash(step),
        output_hash: output_hash(step),
        event_count: step.events.len(),
        has_error: step.has_error(),
    }
}

fn context(steps: &[Step], center: usize, size: usize) -> Vec<StepSummary> {
    let start = center.saturating_sub(size);
    let end = steps.len().min(center + size + 1);
    steps[start..end].iter().map(make_summary).collect()
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn classify_step_pair(step_a: &Step, step_b: &Step) -> DivergenceStatus {
    if step_a.name != step_b.name {
        return DivergenceStatus::OpDivergence;
    }

    if input_hash(step_a) != input_hash(step_b) {
        return DivergenceStatus::InputDivergence;
    }

    let has_err_a = step_a.has_error();
    let has_err_b = step_b.has_error();
    if has_err_a != has_err_b {
        return DivergenceStatus::ErrorDivergence;
    }
    if has_err_a && has_err_b {
        let errors_a = payloads_of_type(step_a, event_type::ERROR);
        let errors_b = payloads_of_type(step_b, event_type::ERROR);
        if canon(&errors_a) != canon(&errors_b) {
            return DivergenceStatus::ErrorDivergence;
        }
    }

    if output_hash(step_a) != output_hash(step_b) {
        return DivergenceStatus::OutputDivergence;
    }

    // Fallback: compare all events (catches tool_call, artifact_ref, and
    // unknown output-like tags).
    if canon(&all_events(step_a)) != canon(&all_events(step_b)) {
        return DivergenceStatus::OutputDivergence;
    }

    DivergenceStatus::ExactMatch
}

fn all_events(step: &Step) -> Value {
    Value::Seq(
        step.events
            .iter()
            .map(|event| {
                Value::Seq(vec![
                    Value::Str(event.event_type.clone()),
                    event.payload.clone(),
                ])
            })
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Resync
// ---------------------------------------------------------------------------

/// Find the earliest matching signature pair within the resync window.
///
/// Iterates by increasing combined distance from `start` so the closest
/// resync point is found first. Ties break on the smaller offset into A.
fn try_resync(
    steps_a: &[Step],
    steps_b: &[Step],
    start: usize,
    window: usize,
) -> Option<(usize, usize)> {
    for total_dist in 1..=(2 * window) {
        for offset_a in 0..window.min(total_dist + 1) {
            let offset_b = total_dist - offset_a;
            if offset_b >= window {
                continue;
            }
            let ia = start + offset_a;
            let ib = start + offset_b;
            if ia >= steps_a.len() || ib >= steps_b.len() {
                continue;
            }
            if signature(&steps_a[ia]) == signature(&steps_b[ib]) {
                return Some((ia, ib));
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Explanation
// ---------------------------------------------------------------------------

fn explain_step(status: DivergenceStatus, step_a: &Step, step_b: &Step, idx: usize) -> String {
    match status {
        DivergenceStatus::OpDivergence => format!(
            "Step {idx}: operation mismatch ('{}' vs '{}')",
            step_a.name, step_b.name
        ),
        DivergenceStatus::InputDivergence => {
            format!("Step {idx} '{}': input differs", step_a.name)
        }
        DivergenceStatus::OutputDivergence => {
            format!("Step {idx} '{}': output differs (same input)", step_a.name)
        }
        DivergenceStatus::ErrorDivergence => {
            format!("Step {idx} '{}': error state differs", step_a.name)
        }
        _ => format!("Unknown divergence at indices ({idx}, {idx})"),
    }
}

fn explain_missing(idx: usize, gap: usize) -> String {
    if gap > 1 {
        let end = idx + gap - 1;
        format!("Steps {idx}..{end} from run_a missing in run_b")
    } else {
        format!("Step {idx} from run_a missing in run_b")
    }
}

fn explain_extra(idx: usize, gap: usize) -> String {
    if gap > 1 {
        let end = idx + gap - 1;
        format!("Steps {idx}..{end} in run_b not present in run_a")
    } else {
        format!("Step {idx} in run_b not present in run_a")
    }
}

// ---------------------------------------------------------------------------
// Diff computation
// ---------------------------------------------------------------------------

fn compute_diffs(
    step_a: &Step,
    step_b: &Step,
    status: DivergenceStatus,
    show: ShowDiffs,
) -> (Option<Vec<DiffOp>>, Option<Vec<DiffOp>>) {
    let mut input_diff = None;
    let mut output_diff = None;

    if status == DivergenceStatus::InputDivergence && show.includes_input() {
        let inputs_a = payloads_of_type(step_a, event_type::INPUT);
        let inputs_b = payloads_of_type(step_b, event_type::INPUT);
        input_diff = Some(json_diff(&inputs_a, &inputs_b, "$"));
    }

    if status == DivergenceStatus::OutputDivergence && show.includes_output() {
        let outputs_a = payloads_of_type(step_a, event_type::OUTPUT);
        let outputs_b = payloads_of_type(step_b, event_type::OUTPUT);
        output_diff = Some(json_diff(&outputs_a, &outputs_b, "$"));
    }

    (input_diff, output_diff)
}

// ---------------------------------------------------------------------------
// Main engine
// ---------------------------------------------------------------------------

/// Find the first point of divergence between two runs.
///
/// `run_a` is the baseline, `run_b` the comparison. Returns exactly one of
/// the seven terminal statuses; for a non-match, a single `(idx_a, idx_b)`
/// site is reported and no later step of either run is examined.
#[must_use]
pub fn find_first_divergence(
    run_a: &Run,
    run_b: &Run,
    options: &DiffOptions,
) -> FirstDivergenceResult {
    let steps_a = run_a.steps.as_slice();
    let steps_b = run_b.steps.as_slice();
    let mut last_equal: i64 = -1;

    let mut i = 0;
    while i < steps_a.len() && i < steps_b.len() {
        let status = classify_step_pair(&steps_a[i], &steps_b[i]);
        if status == DivergenceStatus::ExactMatch {
            last_equal = i as i64;
            i += 1;
            continue;
        }

        // Mismatch: attempt resync within the window.
        if let Some((ia, ib)) = try_resync(steps_a, steps_b, i, options.window) {
            let gap_a = ia - i;
            let gap_b = ib - i;

            if gap_a > 0 && gap_b == 0 {
                return FirstDivergenceResult {
                    status: DivergenceStatus::MissingSteps,
                    idx_a: Some(i),
                    idx_b: Some(i),
                    explanation: explain_missing(i, gap_a),
                    old_step: Some(make_summary(&steps_a[i])),
                    new_step: Some(make_summary(&steps_b[i])),
                    input_diff: None,
                    output_diff: None,
                    last_equal_idx: last_equal,
                    context_a: context(steps_a, i, options.context_size),
                    context_b: context(steps_b, i, options.context_size),
                };
            }

            if gap_b > 0 && gap_a == 0 {
                return FirstDivergenceResult {
                    status: DivergenceStatus::ExtraSteps,
                    idx_a: Some(i),
                    idx_b: Some(i),
                    explanation: explain_extra(i, gap_b),
                    old_step: Some(make_summary(&steps_a[i])),
                    new_step: Some(make_summary(&steps_b[i])),
                    input_diff: None,
                    output_diff: None,
                    last_equal_idx: last_equal,
                    context_a: context(steps_a, i, options.context_size),
                    context_b: context(steps_b, i, options.context_size),
                };
            }
            // Both gaps positive: the steps were replaced; fall through to
            // step-local classification at the current index.
        }

        let (input_diff, output_diff) =
            compute_diffs(&steps_a[i], &steps_b[i], status, options.show);
        return FirstDivergenceResult {
            status,
            idx_a: Some(i),
            idx_b: Some(i),
            explanation: explain_step(status, &steps_a[i], &steps_b[i], i),
            old_step: Some(make_summary(&steps_a[i])),
            new_step: Some(make_summary(&steps_b[i])),
            input_diff,
            output_diff,
            last_equal_idx: last_equal,
            context_a: context(steps_a, i, options.context_size),
            context_b: context(steps_b, i, options.context_size),
        };
    }

    // One run is longer than the other.
    if steps_a.len() > steps_b.len() {
        let idx = steps_b.len();
        let gap = steps_a.len() - steps_b.len();
        return FirstDivergenceResult {
            status: DivergenceStatus::MissingSteps,
            idx_a: Some(idx),
            idx_b: None,
            explanation: explain_missing(idx, gap),
            old_step: Some(make_summary(&steps_a[idx])),
            new_step: None,
            input_diff: None,
            output_diff: None,
            last_equal_idx: last_equal,
            context_a: context(steps_a, idx, options.context_size),
            context_b: if steps_b.is_empty() {
                Vec::new()
            } else {
                context(steps_b, steps_b.len() - 1, options.context_size)
            },
        };
    }

    if steps_b.len() > steps_a.len() {
        let idx = steps_a.len();
        let gap = steps_b.len() - steps_a.len();
        return FirstDivergenceResult {
            status: DivergenceStatus::ExtraSteps,
            idx_a: None,
            idx_b: Some(idx),
            explanation: explain_extra(idx, gap),
            old_step: None,
            new_step: Some(make_summary(&steps_b[idx])),
            input_diff: None,
            output_diff: None,
            last_equal_idx: last_equal,
            context_a: if steps_a.is_empty() {
                Vec::new()
            } else {
                context(steps_a, steps_a.len() - 1, options.context_size)
            },
            context_b: context(steps_b, idx, options.context_size),
        };
    }

    FirstDivergenceResult {
        status: DivergenceStatus::ExactMatch,
        idx_a: None,
        idx_b: None,
        explanation: format!("Runs are identical ({} steps compared)", steps_a.len()),
        old_step: None,
        new_step: None,
        input_diff: None,
        output_diff: None,
        last_equal_idx: last_equal,
        context_a: Vec::new(),
        context_b: Vec::new(),
    }
}
