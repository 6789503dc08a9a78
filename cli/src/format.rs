//! Output formatting for diff results.
//!
//! The text template is fixed: value previews truncate at 40 characters,
//! each diff section shows at most 10 operations with an overflow counter.

use forkline_core::first_divergence::{FirstDivergenceResult, StepSummary};
use forkline_core::json_diff::DiffOp;

const PREVIEW_CHARS: usize = 40;
const MAX_OPS_SHOWN: usize = 10;

/// Serialized result record, pretty-printed.
#[must_use]
pub fn format_json(result: &FirstDivergenceResult) -> String {
    serde_json::to_string_pretty(&result.to_json())
        .unwrap_or_else(|_| String::from("{}"))
}

/// Fixed multi-line human-readable report.
#[must_use]
pub fn format_text(result: &FirstDivergenceResult) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("First divergence: {}", result.status));
    lines.push(format!("  {}", result.explanation));
    lines.push(String::new());

    if let Some(step) = &result.old_step {
        push_step_block(&mut lines, "Run A", step);
    }
    if let Some(step) = &result.new_step {
        push_step_block(&mut lines, "Run B", step);
    }

    if let Some(ops) = &result.input_diff {
        push_diff_section(&mut lines, "Input diff", ops);
    }
    if let Some(ops) = &result.output_diff {
        push_diff_section(&mut lines, "Output diff", ops);
    }

    lines.push(format!("  Last equal: step {}", result.last_equal_idx));

    if !result.context_a.is_empty() {
        lines.push(format!("  Context A: [{}]", context_list(&result.context_a)));
    }
    if !result.context_b.is_empty() {
        lines.push(format!("  Context B: [{}]", context_list(&result.context_b)));
    }

    lines.join("\n")
}

fn push_step_block(lines: &mut Vec<String>, label: &str, step: &StepSummary) {
    lines.push(format!("  {label} step {} '{}':", step.idx, step.name));
    lines.push(format!("    input_hash:  {}...", &step.input_hash[..16]));
    lines.push(format!("    output_hash: {}...", &step.output_hash[..16]));
    lines.push(format!("    events: {}", step.event_count));
    lines.push(format!("    has_error: {}", step.has_error));
    lines.push(String::new());
}

fn push_diff_section(lines: &mut Vec<String>, title: &str, ops: &[DiffOp]) {
    if ops.is_empty() {
        return;
    }
    lines.push(format!("  {title}:"));
    for op in ops.iter().take(MAX_OPS_SHOWN) {
        lines.push(format!("    {} {}: {}", op.op_name(), op.path(), compact_value(op)));
    }
    if ops.len() > MAX_OPS_SHOWN {
        lines.push(format!(
            "    ... and {} more operations",
            ops.len() - MAX_OPS_SHOWN
        ));
    }
    lines.push(String::new());
}

fn context_list(steps: &[StepSummary]) -> String {
    steps
        .iter()
        .map(|s| format!("step {} '{}'", s.idx, s.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn compact_value(op: &DiffOp) -> String {
    match op {
        DiffOp::Replace { old, new, .. } => format!(
            "{} -> {}",
            truncate(render(old)),
            truncate(render(new))
        ),
        DiffOp::Add { value, .. } => truncate(render(value)),
        DiffOp::Remove { old, .. } => truncate(render(old)),
    }
}

fn render(value: &forkline_core::value::Value) -> String {
    serde_json::to_string(&value.to_json()).unwrap_or_else(|_| String::from("?"))
}

fn truncate(text: String) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text;
    }
    let head: String = text.chars().take(PREVIEW_CHARS - 3).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkline_core::first_divergence::{find_first_divergence, DiffOptions};
    use forkline_core::model::{Event, Run, Step};
    use forkline_core::value::Value;
    use serde_json::json;

    fn step_io(idx: usize, name: &str, inp: serde_json::Value, out: serde_json::Value) -> Step {
        let evt = |tag: &str, payload: serde_json::Value| Event {
            event_id: None,
            run_id: "test".into(),
            step_idx: idx,
            event_type: tag.into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            payload: Value::from_json(payload),
        };
        Step {
            step_id: None,
            run_id: "test".into(),
            idx,
            name: name.into(),
            started_at: "2024-01-01T00:00:00Z".into(),
            ended_at: None,
            events: vec![evt("input", inp), evt("output", out)],
        }
    }

    fn run(id: &str, steps: Vec<Step>) -> Run {
        Run {
            run_id: id.into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            steps,
            forkline_version: forkline_core::model::FORKLINE_VERSION.into(),
            schema_version: forkline_core::model::SCHEMA_VERSION.into(),
        }
    }

    #[test]
    fn truncate_caps_at_forty_chars() {
        let short = "x".repeat(40);
        assert_eq!(truncate(short.clone()), short);
        let long = "y".repeat(41);
        let out = truncate(long);
        assert_eq!(out.chars().count(), 40);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn truncate_is_char_safe() {
        let long = "é".repeat(50);
        let out = truncate(long);
        assert_eq!(out.chars().count(), 40);
    }

    #[test]
    fn text_report_for_exact_match() {
        let make = |id: &str| run(id, vec![step_io(0, "init", json!({"x": 1}), json!({"y": 2}))]);
        let result = find_first_divergence(&make("a"), &make("b"), &DiffOptions::default());
        let text = format_text(&result);
        assert!(text.starts_with("First divergence: exact_match"));
        assert!(text.contains("Runs are identical (1 steps compared)"));
        assert!(text.contains("Last equal: step 0"));
    }

    #[test]
    fn text_report_shows_divergent_steps_and_diff() {
        let run_a = run("a", vec![step_io(0, "gen", json!({"p": "hi"}), json!({"t": "hello"}))]);
        let run_b = run("b", vec![step_io(0, "gen", json!({"p": "hi"}), json!({"t": "hey"}))]);
        let result = find_first_divergence(&run_a, &run_b, &DiffOptions::default());
        let text = format_text(&result);
        assert!(text.contains("First divergence: output_divergence"));
        assert!(text.contains("Run A step 0 'gen':"));
        assert!(text.contains("Run B step 0 'gen':"));
        assert!(text.contains("Output diff:"));
        assert!(text.contains("replace $[0].t: \"hello\" -> \"hey\""));
        assert!(text.contains("Context A: [step 0 'gen']"));
    }

    #[test]
    fn diff_section_caps_at_ten_operations() {
        let wide = |v: i64| -> serde_json::Value {
            (0..15)
                .map(|i| (format!("k{i:02}"), json!(v)))
                .collect::<serde_json::Map<_, _>>()
                .into()
        };
        let big_a = wide(1);
        let big_b = wide(2);
        let run_a = run("a", vec![step_io(0, "gen", json!({}), big_a)]);
        let run_b = run("b", vec![step_io(0, "gen", json!({}), big_b)]);
        let result = find_first_divergence(&run_a, &run_b, &DiffOptions::default());
        let text = format_text(&result);
        assert!(text.contains("... and 5 more operations"));
        assert_eq!(text.matches("replace ").count(), 10);
    }

    #[test]
    fn json_output_has_fixed_keys() {
        let make = |id: &str| run(id, vec![step_io(0, "init", json!({"x": 1}), json!({"y": 2}))]);
        let result = find_first_divergence(&make("a"), &make("b"), &DiffOptions::default());
        let parsed: serde_json::Value =
            serde_json::from_str(&format_json(&result)).unwrap();
        for key in [
            "status",
            "idx_a",
            "idx_b",
            "explanation",
            "last_equal_idx",
            "old_step",
            "new_step",
            "input_diff",
            "output_diff",
            "context_a",
            "context_b",
        ] {
            assert!(parsed.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(parsed["status"], json!("exact_match"));
    }
}
