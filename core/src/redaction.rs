//! Redaction: a deterministic rewrite pass applied at the storage boundary.
//!
//! Every payload is redacted before persistence. Redaction is a pure
//! function of `(policy, event_type, payload)`: no I/O, no randomness, no
//! mutation of inputs. When several rules could fire for a `(key, path)`
//! pair, the earliest rule in the policy list wins.

use std::collections::BTreeMap;

use crate::canon::{canon, sha256_hex};
use crate::value::Value;

/// Replacement literal used by [`RedactionAction::Mask`].
pub const REDACTED: &str = "[REDACTED]";

/// Action to take when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionAction {
    /// Replace the value with [`REDACTED`].
    Mask,
    /// Replace the value with `"hash:" + sha256(canonical bytes)`.
    Hash,
    /// Omit the key entirely.
    Drop,
}

/// Error constructing a redaction rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A rule must carry a key pattern, a path pattern, or both.
    RuleWithoutPattern,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleWithoutPattern => {
                write!(f, "redaction rule requires at least one pattern")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// A single redaction rule.
///
/// Matching is case-insensitive substring containment:
/// - `key_pattern` matches against the key name,
/// - `path_pattern` matches against the dot-separated path
///   (e.g. `"args.headers.authorization"`).
///
/// An absent pattern matches everything; both supplied patterns must match
/// for the rule to fire.
#[derive(Debug, Clone)]
pub struct RedactionRule {
    action: RedactionAction,
    key_needle: Option<String>,
    path_needle: Option<String>,
}

impl RedactionRule {
    /// Build a rule. Rejects rules with neither pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::RuleWithoutPattern`] if both patterns are
    /// absent.
    pub fn new(
        action: RedactionAction,
        key_pattern: Option<&str>,
        path_pattern: Option<&str>,
    ) -> Result<Self, PolicyError> {
        if key_pattern.is_none() && path_pattern.is_none() {
            return Err(PolicyError::RuleWithoutPattern);
        }
        Ok(Self {
            action,
            key_needle: key_pattern.map(str::to_lowercase),
            path_needle: path_pattern.map(str::to_lowercase),
        })
    }

    fn matches(&self, key: &str, path: &str) -> bool {
        let key_matches = self
            .key_needle
            .as_ref()
            .is_none_or(|needle| key.to_lowercase().contains(needle));
        let path_matches = self
            .path_needle
            .as_ref()
            .is_none_or(|needle| path.to_lowercase().contains(needle));
        key_matches && path_matches
    }
}

/// An ordered list of redaction rules. First firing rule wins.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    rules: Vec<RedactionRule>,
}

impl RedactionPolicy {
    #[must_use]
    pub fn new(rules: Vec<RedactionRule>) -> Self {
        Self { rules }
    }

    /// Redact a payload according to the policy rules.
    ///
    /// Returns a new value; the input is never mutated. `event_type` is
    /// reserved for event-scoped rules.
    #[must_use]
    pub fn redact(&self, _event_type: &str, payload: &Value) -> Value {
        self.redact_value(payload, "")
    }

    fn redact_value(&self, value: &Value, path: &str) -> Value {
        match value {
            Value::Map(entries) => self.redact_map(entries, path),
            Value::Seq(items) => Value::Seq(
                items
                    .iter()
                    .map(|item| self.redact_value(item, path))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn redact_map(&self, entries: &BTreeMap<String, Value>, path: &str) -> Value {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
            let current = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            match self.first_match(key, &current) {
                None => {
                    out.insert(key.clone(), self.redact_value(value, &current));
                }
                Some(rule) => match rule.action {
                    RedactionAction::Drop => {}
                    RedactionAction::Mask => {
                        out.insert(key.clone(), Value::Str(REDACTED.to_string()));
                    }
                    RedactionAction::Hash => {
                        let digest = sha256_hex(&canon(value));
                        out.insert(key.clone(), Value::Str(format!("hash:{digest}")));
                    }
                },
            }
        }
        Value::Map(out)
    }

    fn first_match(&self, key: &str, path: &str) -> Option<&RedactionRule> {
        self.rules.iter().find(|rule| rule.matches(key, path))
    }
}

/// Key names masked by the committed SAFE-mode policy.
///
/// This list is shipped verbatim for interoperability of recordings.
const SAFE_MODE_KEYS: [&str; 17] = [
    "key",
    "token",
    "secret",
    "password",
    "api_key",
    "apikey",
    "auth",
    "authorization",
    "cookie",
    "set-cookie",
    "credentials",
    "private_key",
    "privatekey",
    "access_token",
    "refresh_token",
    "session",
    "csrf",
];

/// The default SAFE-mode policy: mask every key whose name contains a
/// credential-bearing fragment.
#[must_use]
pub fn default_policy() -> RedactionPolicy {
    let rules = SAFE_MODE_KEYS
        .iter()
        .map(|pattern| RedactionRule {
            action: RedactionAction::Mask,
            key_needle: Some((*pattern).to_string()),
            path_needle: None,
        })
        .collect();
    RedactionPolicy::new(rules)
}
