//! Semantic comparator: field-path diffing used by the replay engine.
//!
//! A second, simpler comparator than the JSON-patch differ: replay cares
//! about *which field* diverged, not about patch emission rules. All
//! renderings are deterministic strings so divergence reports are stable
//! across processes.

use std::collections::BTreeSet;

use crate::model::{Event, Step};
use crate::value::Value;

/// Sentinel rendered for a key present on one side only.
pub const MISSING: &str = "<missing>";

/// Key names skipped by default during event comparison (timestamps are
/// metadata, not semantics).
#[must_use]
pub fn default_ignore_keys() -> BTreeSet<String> {
    ["created_at", "ts", "timestamp"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// One field-level difference between an expected and an actual value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

/// Why a replayed step diverged from the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    /// Step names differ.
    NameMismatch,
    /// Step event counts differ.
    EventCountMismatch,
    /// A specific event's type or payload differs.
    EventMismatch,
    /// The replay produced a different number of steps than the recording.
    StepCountMismatch,
}

impl DivergenceReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NameMismatch => "name_mismatch",
            Self::EventCountMismatch => "event_count_mismatch",
            Self::EventMismatch => "event_mismatch",
            Self::StepCountMismatch => "step_count_mismatch",
        }
    }
}

impl std::fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first site at which a replayed step diverged from the recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergencePoint {
    pub step_idx: usize,
    pub step_name: String,
    pub event_idx: Option<usize>,
    pub reason: DivergenceReason,
    pub field_diffs: Vec<FieldDiff>,
}

/// Render a value as deterministic compact JSON text. Strings stay quoted
/// and bytes render as their digest envelope, keeping renderings
/// unambiguous.
fn render(value: &Value) -> String {
    serde_json::to_string(&value.to_json())
        .unwrap_or_else(|_| String::from("<unrepresentable>"))
}

/// Recursively compare two values, reporting every differing field path.
///
/// - Different kinds at a node produce a single `type:<kind>` diff.
/// - Mappings walk the union of keys in ascending order; one-sided keys
///   render as [`MISSING`].
/// - Sequences emit a `.length` diff when lengths differ, then recurse into
///   the common prefix.
/// - Primitives compare by structural equality.
/// - `ignore_keys` are key names skipped wherever they appear.
#[must_use]
pub fn deep_compare(
    expected: &Value,
    actual: &Value,
    path: &str,
    ignore_keys: &BTreeSet<String>,
) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    compare_into(expected, actual, path, ignore_keys, &mut diffs);
    diffs
}

fn compare_into(
    expected: &Value,
    actual: &Value,
    path: &str,
    ignore_keys: &BTreeSet<String>,
    diffs: &mut Vec<FieldDiff>,
) {
    if std::mem::discriminant(expected) != std::mem::discriminant(actual) {
        diffs.push(FieldDiff {
            path: path.to_string(),
            expected: format!("type:{}", expected.kind()),
            actual: format!("type:{}", actual.kind()),
        });
        return;
    }

    match (expected, actual) {
        (Value::Map(exp_map), Value::Map(act_map)) => {
            let keys: BTreeSet<&String> = exp_map.keys().chain(act_map.keys()).collect();
            for key in keys {
                if ignore_keys.contains(key.as_str()) {
                    continue;
                }
                let child = join_path(path, key);
                match (exp_map.get(key), act_map.get(key)) {
                    (Some(e), Some(a)) => compare_into(e, a, &child, ignore_keys, diffs),
                    (Some(e), None) => diffs.push(FieldDiff {
                        path: child,
                        expected: render(e),
                        actual: MISSING.to_string(),
                    }),
                    (None, Some(a)) => diffs.push(FieldDiff {
                        path: child,
                        expected: MISSING.to_string(),
                        actual: render(a),
                    }),
                    (None, None) => {}
                }
            }
        }
        (Value::Seq(exp_seq), Value::Seq(act_seq)) => {
            if exp_seq.len() != act_seq.len() {
                diffs.push(FieldDiff {
                    path: join_path(path, "length"),
                    expected: exp_seq.len().to_string(),
                    actual: act_seq.len().to_string(),
                });
            }
            for (i, (e, a)) in exp_seq.iter().zip(act_seq.iter()).enumerate() {
                compare_into(e, a, &format!("{path}[{i}]"), ignore_keys, diffs);
            }
        }
        _ => {
            if expected != actual {
                diffs.push(FieldDiff {
                    path: path.to_string(),
                    expected: render(expected),
                    actual: render(actual),
                });
            }
        }
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Compare a recorded event against a re-executed one: a `type` diff when
/// the tags differ, then the payload field diffs.
#[must_use]
pub fn compare_events(
    expected: &Event,
    actual: &Event,
    ignore_keys: &BTreeSet<String>,
) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    if expected.event_type != actual.event_type {
        diffs.push(FieldDiff {
            path: "type".to_string(),
            expected: expected.event_type.clone(),
            actual: actual.event_type.clone(),
        });
    }
    diffs.extend(deep_compare(
        &expected.payload,
        &actual.payload,
        "",
        ignore_keys,
    ));
    diffs
}

/// Compare a recorded step against a re-executed one, halting at the first
/// difference. `None` means the steps match.
///
/// Check order: name, then event count (with the two event-type lists for
/// context), then the first event-level difference.
#[must_use]
pub fn compare_steps(
    recorded: &Step,
    replayed: &Step,
    ignore_keys: &BTreeSet<String>,
) -> Option<DivergencePoint> {
    if recorded.name != replayed.name {
        return Some(DivergencePoint {
            step_idx: recorded.idx,
            step_name: recorded.name.clone(),
            event_idx: None,
            reason: DivergenceReason::NameMismatch,
            field_diffs: vec![FieldDiff {
                path: "name".to_string(),
                expected: recorded.name.clone(),
                actual: replayed.name.clone(),
            }],
        });
    }

    if recorded.events.len() != replayed.events.len() {
        return Some(DivergencePoint {
            step_idx: recorded.idx,
            step_name: recorded.name.clone(),
            event_idx: None,
            reason: DivergenceReason::EventCountMismatch,
            field_diffs: vec![FieldDiff {
                path: "events".to_string(),
                expected: describe_events(recorded),
                actual: describe_events(replayed),
            }],
        });
    }

    for (i, (expected, actual)) in recorded.events.iter().zip(replayed.events.iter()).enumerate()
    {
        let field_diffs = compare_events(expected, actual, ignore_keys);
        if !field_diffs.is_empty() {
            return Some(DivergencePoint {
                step_idx: recorded.idx,
                step_name: recorded.name.clone(),
                event_idx: Some(i),
                reason: DivergenceReason::EventMismatch,
                field_diffs,
            });
        }
    }

    None
}

fn describe_events(step: &Step) -> String {
    let types: Vec<&str> = step.events.iter().map(|e| e.event_type.as_str()).collect();
    format!("{} events [{}]", step.events.len(), types.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn val(j: serde_json::Value) -> Value {
        Value::from_json(j)
    }

    fn compare(e: serde_json::Value, a: serde_json::Value) -> Vec<FieldDiff> {
        deep_compare(&val(e), &val(a), "", &default_ignore_keys())
    }

    fn evt(tag: &str, payload: serde_json::Value) -> Event {
        Event {
            event_id: None,
            run_id: "test".into(),
            step_idx: 0,
            event_type: tag.into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            payload: val(payload),
        }
    }

    fn step(idx: usize, name: &str, events: Vec<Event>) -> Step {
        Step {
            step_id: None,
            run_id: "test".into(),
            idx,
            name: name.into(),
            started_at: "2024-01-01T00:00:00Z".into(),
            ended_at: None,
            events,
        }
    }

    #[test]
    fn equal_values_no_diffs() {
        assert!(compare(json!({"a": [1, {"b": 2}]}), json!({"a": [1, {"b": 2}]})).is_empty());
    }

    #[test]
    fn kind_mismatch_single_diff() {
        let diffs = compare(json!({"k": {"x": 1}}), json!({"k": [1]}));
        assert_eq!(
            diffs,
            vec![FieldDiff {
                path: "k".into(),
                expected: "type:map".into(),
                actual: "type:seq".into(),
            }]
        );
    }

    #[test]
    fn missing_keys_use_sentinel() {
        let diffs = compare(json!({"a": 1, "b": 2}), json!({"b": 2, "c": 3}));
        assert_eq!(
            diffs,
            vec![
                FieldDiff {
                    path: "a".into(),
                    expected: "1".into(),
                    actual: MISSING.into(),
                },
                FieldDiff {
                    path: "c".into(),
                    expected: MISSING.into(),
                    actual: "3".into(),
                },
            ]
        );
    }

    #[test]
    fn sequence_length_then_common_prefix() {
        let diffs = compare(json!([1, 2, 3]), json!([1, 9]));
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "length");
        assert_eq!(diffs[0].expected, "3");
        assert_eq!(diffs[0].actual, "2");
        assert_eq!(diffs[1].path, "[1]");
    }

    #[test]
    fn nested_paths() {
        let diffs = compare(
            json!({"a": {"b": [0, {"c": "x"}]}}),
            json!({"a": {"b": [0, {"c": "y"}]}}),
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "a.b[1].c");
        assert_eq!(diffs[0].expected, "\"x\"");
        assert_eq!(diffs[0].actual, "\"y\"");
    }

    #[test]
    fn ignore_keys_skipped_at_any_depth() {
        let diffs = compare(
            json!({"ts": 1, "nested": {"timestamp": "a", "v": 1}}),
            json!({"ts": 2, "nested": {"timestamp": "b", "v": 1}}),
        );
        assert!(diffs.is_empty());
    }

    #[test]
    fn bool_vs_int_is_kind_mismatch() {
        let diffs = compare(json!({"k": true}), json!({"k": 1}));
        assert_eq!(diffs[0].expected, "type:bool");
        assert_eq!(diffs[0].actual, "type:int");
    }

    #[test]
    fn compare_events_type_diff_first() {
        let diffs = compare_events(
            &evt("output", json!({"y": 1})),
            &evt("error", json!({"y": 2})),
            &default_ignore_keys(),
        );
        assert_eq!(diffs[0].path, "type");
        assert_eq!(diffs[0].expected, "output");
        assert_eq!(diffs[0].actual, "error");
        assert_eq!(diffs[1].path, "y");
    }

    #[test]
    fn compare_events_ignores_timestamp_keys() {
        let diffs = compare_events(
            &evt("output", json!({"y": 1, "ts": "2024"})),
            &evt("output", json!({"y": 1, "ts": "2025"})),
            &default_ignore_keys(),
        );
        assert!(diffs.is_empty());
    }

    #[test]
    fn compare_steps_name_mismatch() {
        let point = compare_steps(
            &step(2, "plan", vec![]),
            &step(2, "reflect", vec![]),
            &default_ignore_keys(),
        )
        .expect("must diverge");
        assert_eq!(point.reason, DivergenceReason::NameMismatch);
        assert_eq!(point.step_idx, 2);
        assert_eq!(point.event_idx, None);
        assert_eq!(point.field_diffs[0].path, "name");
    }

    #[test]
    fn compare_steps_event_count_mismatch() {
        let point = compare_steps(
            &step(0, "work", vec![evt("input", json!({})), evt("output", json!({}))]),
            &step(0, "work", vec![evt("input", json!({}))]),
            &default_ignore_keys(),
        )
        .expect("must diverge");
        assert_eq!(point.reason, DivergenceReason::EventCountMismatch);
        assert_eq!(point.field_diffs[0].expected, "2 events [input, output]");
        assert_eq!(point.field_diffs[0].actual, "1 events [input]");
    }

    #[test]
    fn compare_steps_halts_at_first_event_diff() {
        let recorded = step(
            0,
            "work",
            vec![
                evt("input", json!({"x": 1})),
                evt("output", json!({"y": 1})),
                evt("output", json!({"z": 1})),
            ],
        );
        let replayed = step(
            0,
            "work",
            vec![
                evt("input", json!({"x": 1})),
                evt("output", json!({"y": 2})),
                evt("output", json!({"z": 2})),
            ],
        );
        let point = compare_steps(&recorded, &replayed, &default_ignore_keys())
            .expect("must diverge");
        assert_eq!(point.reason, DivergenceReason::EventMismatch);
        assert_eq!(point.event_idx, Some(1));
        assert_eq!(point.field_diffs, vec![FieldDiff {
            path: "y".into(),
            expected: "1".into(),
            actual: "2".into(),
        }]);
    }

    #[test]
    fn compare_steps_match() {
        let s = step(0, "work", vec![evt("input", json!({"x": 1}))]);
        assert!(compare_steps(&s, &s.clone(), &default_ignore_keys()).is_none());
    }
}
