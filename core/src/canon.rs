//! Canonicalization: the single serialization-for-hashing implementation.
//!
//! **Exactly one place** produces canonical bytes for payload values. All
//! hashing and signature flows route through [`canon`].
//!
//! # Canonicalization rules (strict profile)
//!
//! 1. Byte sequences pass through unchanged.
//! 2. Strings are NFC-normalized, CRLF/CR collapsed to LF, encoded UTF-8.
//! 3. Everything else is compact JSON: object keys sorted lexicographically,
//!    no insignificant whitespace, non-ASCII characters emitted verbatim.
//! 4. Finite floats are emitted as the shortest decimal that round-trips
//!    (at most 17 significant digits), always carrying a decimal point or
//!    exponent so a float never encodes like an integer. `-0.0` folds to
//!    `0.0`. NaN and the infinities encode as the strings `"NaN"`,
//!    `"Infinity"`, `"-Infinity"`.
//! 5. Booleans encode as `true`/`false`, distinct from integers.
//! 6. Byte-sequence leaves inside structures encode as
//!    `{"__bytes__":true,"length":n,"sha256":"<hex>"}` so only their content
//!    digest participates in equality.
//!
//! `canon` is pure and total on the domain, independent of process, host,
//! and locale.

use std::io::Write;

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::value::Value;

/// Canonicalize a value to bytes for deterministic comparison.
#[must_use]
pub fn canon(value: &Value) -> Vec<u8> {
    match value {
        Value::Bytes(data) => data.clone(),
        Value::Str(s) => canon_str(s).into_bytes(),
        other => {
            let mut buf = Vec::new();
            write_value(&mut buf, other);
            buf
        }
    }
}

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Human-readable preview of canonical bytes: full digest plus hex prefix.
///
/// Format: `"sha256:<full-hex-digest>:<first-max_len-bytes-as-hex>"`.
#[must_use]
pub fn bytes_preview(data: &[u8], max_len: usize) -> String {
    let prefix = hex::encode(&data[..data.len().min(max_len)]);
    format!("sha256:{}:{prefix}", sha256_hex(data))
}

/// NFC-normalize a string and collapse CRLF / lone CR to LF.
fn canon_str(s: &str) -> String {
    let normalized: String = s.nfc().collect();
    normalized.replace("\r\n", "\n").replace('\r', "\n")
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Int(i) => {
            let _ = write!(buf, "{i}");
        }
        Value::Float(f) => write_float(buf, *f),
        Value::Str(s) => write_string(buf, &canon_str(s)),
        Value::Bytes(data) => {
            // Envelope keys are already in sorted order.
            let _ = write!(
                buf,
                r#"{{"__bytes__":true,"length":{},"sha256":"{}"}}"#,
                data.len(),
                sha256_hex(data)
            );
        }
        Value::Seq(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item);
            }
            buf.push(b']');
        }
        Value::Map(entries) => {
            // BTreeMap iterates keys in lexicographic byte order.
            buf.push(b'{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_value(buf, item);
            }
            buf.push(b'}');
        }
    }
}

fn write_float(buf: &mut Vec<u8>, f: f64) {
    if f.is_nan() {
        buf.extend_from_slice(b"\"NaN\"");
    } else if f.is_infinite() {
        if f > 0.0 {
            buf.extend_from_slice(b"\"Infinity\"");
        } else {
            buf.extend_from_slice(b"\"-Infinity\"");
        }
    } else {
        let folded = if f == 0.0 { 0.0 } else { f };
        // `{:?}` emits the shortest decimal that round-trips, always with a
        // decimal point or exponent, never more than 17 significant digits.
        let _ = write!(buf, "{folded:?}");
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if c < '\u{0020}' => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => {
                let mut utf8_buf = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8_buf).as_bytes());
            }
        }
    }
    buf.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon_json(j: serde_json::Value) -> Vec<u8> {
        canon(&Value::from_json(j))
    }

    #[test]
    fn bytes_pass_through() {
        let data = vec![0u8, 1, 2, 255];
        assert_eq!(canon(&Value::Bytes(data.clone())), data);
    }

    #[test]
    fn sorted_keys() {
        assert_eq!(
            canon_json(json!({"z": 1, "a": 2, "m": 3})),
            b"{\"a\":2,\"m\":3,\"z\":1}"
        );
    }

    #[test]
    fn key_order_insensitive() {
        let v1: serde_json::Value = serde_json::from_str(r#"{"x":1,"a":2,"m":3}"#).unwrap();
        let v2: serde_json::Value = serde_json::from_str(r#"{"m":3,"x":1,"a":2}"#).unwrap();
        assert_eq!(canon_json(v1), canon_json(v2));
    }

    #[test]
    fn nfc_normalization() {
        // U+00E9 (precomposed) vs U+0065 U+0301 (decomposed).
        let precomposed = Value::Str("caf\u{e9}".into());
        let decomposed = Value::Str("cafe\u{301}".into());
        assert_eq!(canon(&precomposed), canon(&decomposed));
        assert_eq!(canon(&precomposed), "caf\u{e9}".as_bytes());
    }

    #[test]
    fn newline_normalization() {
        assert_eq!(canon(&Value::Str("a\r\nb".into())), b"a\nb");
        assert_eq!(canon(&Value::Str("a\rb".into())), b"a\nb");
        assert_eq!(canon(&Value::Str("a\nb".into())), b"a\nb");
    }

    #[test]
    fn nfc_applies_inside_structures() {
        let v1 = Value::from_json(json!({"k": "caf\u{e9}"}));
        let v2 = Value::from_json(json!({"k": "cafe\u{301}"}));
        assert_eq!(canon(&v1), canon(&v2));
    }

    #[test]
    fn bool_distinct_from_int() {
        assert_ne!(canon(&Value::Bool(true)), canon(&Value::Int(1)));
        assert_ne!(canon(&Value::Bool(false)), canon(&Value::Int(0)));
    }

    #[test]
    fn float_distinct_from_int() {
        assert_ne!(canon(&Value::Float(1.0)), canon(&Value::Int(1)));
        assert_eq!(canon(&Value::Float(1.0)), b"1.0");
        assert_eq!(canon(&Value::Int(1)), b"1");
    }

    #[test]
    fn negative_zero_folds() {
        assert_eq!(canon(&Value::Float(-0.0)), canon(&Value::Float(0.0)));
        assert_eq!(canon(&Value::Float(-0.0)), b"0.0");
    }

    #[test]
    fn non_finite_floats_as_strings() {
        assert_eq!(canon(&Value::Float(f64::NAN)), b"\"NaN\"");
        assert_eq!(canon(&Value::Float(f64::INFINITY)), b"\"Infinity\"");
        assert_eq!(canon(&Value::Float(f64::NEG_INFINITY)), b"\"-Infinity\"");
    }

    #[test]
    fn float_round_trips() {
        for f in [0.1, 1.5, -2.75, 1e100, 1e-10, std::f64::consts::PI] {
            let bytes = canon(&Value::Float(f));
            let text = std::str::from_utf8(&bytes).unwrap();
            let parsed: f64 = text.parse().unwrap();
            assert_eq!(parsed.to_bits(), f.to_bits(), "float {f} must round-trip");
        }
    }

    #[test]
    fn bytes_envelope_inside_structures() {
        let mut m = std::collections::BTreeMap::new();
        m.insert("blob".to_string(), Value::Bytes(b"hi".to_vec()));
        let bytes = canon(&Value::Map(m));
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with(r#"{"blob":{"__bytes__":true,"length":2,"sha256":""#));
    }

    #[test]
    fn unicode_passthrough() {
        let bytes = canon_json(json!({"emoji": "hello 🌍"}));
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"emoji":"hello 🌍"}"#
        );
    }

    #[test]
    fn control_char_escaping() {
        let bytes = canon_json(json!({"a": "\u{0001}"}));
        assert_eq!(bytes, b"{\"a\":\"\\u0001\"}");
    }

    #[test]
    fn canonical_json_round_trip() {
        // canon(parse(canon(v))) == canon(v) for JSON-domain values.
        let v = Value::from_json(json!({
            "z": [1, 2.5, "text"],
            "a": {"nested": true, "count": 7},
            "empty": {},
        }));
        let bytes = canon(&v);
        let reparsed: serde_json::Value =
            serde_json::from_slice(&bytes).expect("canonical bytes are valid JSON");
        assert_eq!(canon(&Value::from_json(reparsed)), bytes);
    }

    #[test]
    fn canon_deterministic_n10() {
        let v = Value::from_json(json!({"z": [1, 2], "a": {"c": 3.5, "b": "x\r\ny"}}));
        let first = canon(&v);
        for _ in 0..10 {
            assert_eq!(canon(&v), first);
        }
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn bytes_preview_format() {
        let preview = bytes_preview(b"hello world", 4);
        assert_eq!(
            preview,
            format!("sha256:{}:{}", sha256_hex(b"hello world"), hex::encode(b"hell"))
        );
    }

    #[test]
    fn bytes_preview_short_input() {
        // Prefix is clamped to the data length.
        let preview = bytes_preview(b"ab", 16);
        assert!(preview.ends_with(&hex::encode(b"ab")));
    }
}
