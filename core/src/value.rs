//! The canonical value domain: every payload a run may carry.
//!
//! `Value` is a closed sum: null, booleans, integers, floats (finite or
//! non-finite), Unicode strings, byte sequences, ordered sequences, and
//! string-keyed mappings. Booleans and integers are distinct kinds and are
//! never equated. Mappings use `BTreeMap`, so key insertion order is
//! irrelevant by construction.

use std::collections::BTreeMap;

/// A structured payload value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// The canonical kind tag of this value.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Seq(_) => "seq",
            Self::Map(_) => "map",
        }
    }

    /// Look up a key in a mapping value. Returns `None` for non-mappings.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Convert from a parsed JSON value.
    ///
    /// Numbers that fit `i64` become [`Value::Int`]; any other number
    /// becomes [`Value::Float`]. This conversion is total: every
    /// `serde_json::Value` has a representation in the canonical domain.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::Seq(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value.
    ///
    /// Byte sequences become the `__bytes__` envelope (content digest plus
    /// length), so only their digest participates in downstream equality.
    /// Non-finite floats become the strings `"NaN"`, `"Infinity"`,
    /// `"-Infinity"`; `-0.0` folds to `0.0`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => float_to_json(*f),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(data) => serde_json::json!({
                "__bytes__": true,
                "length": data.len(),
                "sha256": crate::canon::sha256_hex(data),
            }),
            Self::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    if f.is_nan() {
        return serde_json::Value::String("NaN".into());
    }
    if f.is_infinite() {
        let s = if f > 0.0 { "Infinity" } else { "-Infinity" };
        return serde_json::Value::String(s.into());
    }
    let folded = if f == 0.0 { 0.0 } else { f };
    serde_json::Number::from_f64(folded).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Structural equality over the canonical domain.
///
/// Floats compare by numeric equality with `NaN == NaN`, so that a value
/// always equals itself (diffing any value against itself must yield no
/// operations). IEEE equality already identifies `-0.0` with `0.0`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Seq(a), Self::Seq(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}
