//! Deterministic JSON-patch generation between two payload values.
//!
//! Produces a stable, ordered list of diff operations.
//!
//! # Emission order
//!
//! - map node: removed keys (ascending), then added keys (ascending), then
//!   common keys (ascending, recursed)
//! - sequence node: by index; trailing removes, then trailing adds
//! - kind mismatch: a single `replace` for the whole subtree, except that
//!   integers and floats are the same numeric kind (equal when numerically
//!   equal)
//!
//! # Path grammar
//!
//! Dollar-rooted, dot for key access, square brackets for list index:
//! `$.a.b[3].c`. Keys are emitted verbatim: dots, brackets, and dollar
//! signs inside keys are not escaped. Callers must choose payload keys that
//! do not collide with this grammar (known limitation).

use std::collections::BTreeSet;

use crate::value::Value;

/// One diff operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    Add { path: String, value: Value },
    Remove { path: String, old: Value },
    Replace { path: String, old: Value, new: Value },
}

impl DiffOp {
    /// The operation tag (`"add"`, `"remove"`, `"replace"`).
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Replace { .. } => "replace",
        }
    }

    /// The path the operation applies to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Remove { path, .. } | Self::Replace { path, .. } => path,
        }
    }

    /// Serialize as the wire-format patch object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Add { path, value } => serde_json::json!({
                "op": "add", "path": path, "value": value.to_json(),
            }),
            Self::Remove { path, old } => serde_json::json!({
                "op": "remove", "path": path, "old": old.to_json(),
            }),
            Self::Replace { path, old, new } => serde_json::json!({
                "op": "replace", "path": path, "old": old.to_json(), "new": new.to_json(),
            }),
        }
    }
}

/// Produce a deterministic diff patch between two values.
///
/// `path` is the root path for emitted operations, normally `"$"`.
#[must_use]
pub fn json_diff(old: &Value, new: &Value, path: &str) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_into(old, new, path, &mut ops);
    ops
}

fn diff_into(old: &Value, new: &Value, path: &str, ops: &mut Vec<DiffOp>) {
    // Cross-kind: integers and floats are one numeric kind; everything else
    // replaces the whole subtree.
    if std::mem::discriminant(old) != std::mem::discriminant(new) {
        if let (Some(a), Some(b)) = (numeric(old), numeric(new)) {
            if a != b {
                ops.push(DiffOp::Replace {
                    path: path.to_string(),
                    old: old.clone(),
                    new: new.clone(),
                });
            }
            return;
        }
        ops.push(DiffOp::Replace {
            path: path.to_string(),
            old: old.clone(),
            new: new.clone(),
        });
        return;
    }

    match (old, new) {
        (Value::Map(old_map), Value::Map(new_map)) => {
            let old_keys: BTreeSet<&String> = old_map.keys().collect();
            let new_keys: BTreeSet<&String> = new_map.keys().collect();
            for key in old_keys.difference(&new_keys) {
                ops.push(DiffOp::Remove {
                    path: format!("{path}.{key}"),
                    old: old_map[*key].clone(),
                });
            }
            for key in new_keys.difference(&old_keys) {
                ops.push(DiffOp::Add {
                    path: format!("{path}.{key}"),
                    value: new_map[*key].clone(),
                });
            }
            for key in old_keys.intersection(&new_keys) {
                diff_into(&old_map[*key], &new_map[*key], &format!("{path}.{key}"), ops);
            }
        }
        (Value::Seq(old_seq), Value::Seq(new_seq)) => {
            let common = old_seq.len().min(new_seq.len());
            for i in 0..common {
                diff_into(&old_seq[i], &new_seq[i], &format!("{path}[{i}]"), ops);
            }
            for (i, item) in old_seq.iter().enumerate().skip(common) {
                ops.push(DiffOp::Remove {
                    path: format!("{path}[{i}]"),
                    old: item.clone(),
                });
            }
            for (i, item) in new_seq.iter().enumerate().skip(common) {
                ops.push(DiffOp::Add {
                    path: format!("{path}[{i}]"),
                    value: item.clone(),
                });
            }
        }
        _ => {
            if old != new {
                ops.push(DiffOp::Replace {
                    path: path.to_string(),
                    old: old.clone(),
                    new: new.clone(),
                });
            }
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}
