//! Run / Step / Event records and version constants.
//!
//! Records are created by the store, passed by reference into the core, and
//! never mutated by it. `created_at` / `started_at` / `ended_at` are
//! metadata only; they never enter comparisons by default.

use crate::value::Value;

/// Library version stamped onto new recordings.
pub const FORKLINE_VERSION: &str = "0.3.0";

/// Schema version for recording artifacts. Incremented on breaking changes
/// to the artifact format.
pub const SCHEMA_VERSION: &str = "recording_v0";

/// Fallback library version for artifacts recorded before version stamping.
pub const DEFAULT_FORKLINE_VERSION: &str = "0.1.0";

/// Fallback schema version for artifacts recorded before version stamping.
pub const DEFAULT_SCHEMA_VERSION: &str = "recording_v0";

/// Event-type tags the core recognises. Unknown tags are permitted and are
/// treated as generic output-like events during comparison.
pub mod event_type {
    pub const INPUT: &str = "input";
    pub const OUTPUT: &str = "output";
    pub const TOOL_CALL: &str = "tool_call";
    pub const LLM_CALL: &str = "llm_call";
    pub const ARTIFACT_REF: &str = "artifact_ref";
    pub const ERROR: &str = "error";
}

/// One observation within a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Monotonic store-assigned id; `None` for in-memory events.
    pub event_id: Option<i64>,
    pub run_id: String,
    pub step_idx: usize,
    pub event_type: String,
    /// Metadata only.
    pub created_at: String,
    pub payload: Value,
}

/// An ordered group of events sharing a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Store-assigned id; `None` for in-memory steps.
    pub step_id: Option<i64>,
    pub run_id: String,
    /// 0-based index, unique within the run.
    pub idx: usize,
    /// Free-form operation tag; not required to be unique across steps.
    pub name: String,
    /// Metadata only.
    pub started_at: String,
    /// Metadata only.
    pub ended_at: Option<String>,
    /// Insertion-ordered; order is semantically significant.
    pub events: Vec<Event>,
}

impl Step {
    /// Events of the given type, in insertion order.
    pub fn events_of_type<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a Event> {
        self.events
            .iter()
            .filter(move |event| event.event_type == event_type)
    }

    /// Whether this step carries any `error` event.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.events_of_type(event_type::ERROR).next().is_some()
    }
}

/// An ordered sequence of steps produced by a single execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub run_id: String,
    /// Metadata only.
    pub created_at: String,
    /// Ordered by `idx`; duplicates forbidden.
    pub steps: Vec<Step>,
    pub forkline_version: String,
    pub schema_version: String,
}

/// Structural violation in a run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Two steps share the same `idx`.
    DuplicateStepIdx { idx: usize },
    /// Steps are not in ascending `idx` order.
    UnorderedSteps { position: usize },
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateStepIdx { idx } => write!(f, "duplicate step idx {idx}"),
            Self::UnorderedSteps { position } => {
                write!(f, "steps out of idx order at position {position}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

impl Run {
    /// Check that steps are in strictly ascending `idx` order (gaps are
    /// permitted, duplicates are not).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] naming the first offending position.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (position, pair) in self.steps.windows(2).enumerate() {
            if pair[1].idx == pair[0].idx {
                return Err(ModelError::DuplicateStepIdx { idx: pair[1].idx });
            }
            if pair[1].idx < pair[0].idx {
                return Err(ModelError::UnorderedSteps {
                    position: position + 1,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(step_idx: usize, event_type: &str, payload: serde_json::Value) -> Event {
        Event {
            event_id: None,
            run_id: "test".into(),
            step_idx,
            event_type: event_type.into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            payload: Value::from_json(payload),
        }
    }

    fn step(idx: usize, name: &str, events: Vec<Event>) -> Step {
        Step {
            step_id: None,
            run_id: "test".into(),
            idx,
            name: name.into(),
            started_at: "2024-01-01T00:00:00Z".into(),
            ended_at: Some("2024-01-01T00:00:01Z".into()),
            events,
        }
    }

    fn run(steps: Vec<Step>) -> Run {
        Run {
            run_id: "test".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            steps,
            forkline_version: FORKLINE_VERSION.into(),
            schema_version: SCHEMA_VERSION.into(),
        }
    }

    #[test]
    fn events_of_type_preserves_order() {
        let s = step(
            0,
            "work",
            vec![
                event(0, "input", json!({"i": 1})),
                event(0, "output", json!({"o": 1})),
                event(0, "input", json!({"i": 2})),
            ],
        );
        let inputs: Vec<_> = s.events_of_type("input").collect();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].payload, Value::from_json(json!({"i": 1})));
        assert_eq!(inputs[1].payload, Value::from_json(json!({"i": 2})));
    }

    #[test]
    fn has_error_detects_error_events() {
        let clean = step(0, "ok", vec![event(0, "output", json!({}))]);
        let failed = step(1, "bad", vec![event(1, "error", json!({"msg": "boom"}))]);
        assert!(!clean.has_error());
        assert!(failed.has_error());
    }

    #[test]
    fn validate_accepts_gaps() {
        let r = run(vec![step(0, "a", vec![]), step(2, "b", vec![]), step(5, "c", vec![])]);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicates() {
        let r = run(vec![step(0, "a", vec![]), step(1, "b", vec![]), step(1, "c", vec![])]);
        assert_eq!(r.validate().unwrap_err(), ModelError::DuplicateStepIdx { idx: 1 });
    }

    #[test]
    fn validate_rejects_disorder() {
        let r = run(vec![step(2, "a", vec![]), step(0, "b", vec![])]);
        assert_eq!(r.validate().unwrap_err(), ModelError::UnorderedSteps { position: 1 });
    }
}
