//! Safe serialization of trace entries into log records.
//!
//! Every entry yields exactly one record line:
//! 1. direct JSON encoding when the entry encodes as-is,
//! 2. otherwise a cleaned copy (text escaped, keys coerced to text,
//!    unencodable values degraded to their text form), provided no two keys
//!    of a map coerce to the same text,
//! 3. otherwise a fixed sentinel record carrying the entry's debug text.

use chrono::SecondsFormat;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{TraceEntry, TraceValue};

/// Separator written after every record
pub const RECORD_SEPARATOR: char = '\n';

/// `error` field of the sentinel record
pub const UNPROCESSABLE_ENTRY: &str = "unprocessable entry";

/// Deepest nesting the cleaner will walk
pub const MAX_DEPTH: usize = 64;

/// Reasons a value cannot be cleaned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CleanError {
    #[error("value of type {type_name} has no text representation")]
    Unrepresentable { type_name: String },

    #[error("value nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("map key '{key}' occurs more than once after coercion to text")]
    DuplicateKey { key: String },
}

/// An encoded record, tagged with the path that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Direct(String),
    Cleaned(String),
    Sentinel(String),
}

impl Encoded {
    /// The record text, without separator
    pub fn as_str(&self) -> &str {
        match self {
            Encoded::Direct(line) | Encoded::Cleaned(line) | Encoded::Sentinel(line) => line,
        }
    }
}

/// Encode an entry into a single record line. Never fails.
pub fn encode_entry(entry: &TraceEntry) -> Encoded {
    let err = match serde_json::to_string(entry) {
        Ok(line) => return Encoded::Direct(line),
        Err(err) => err,
    };

    debug!(stage = entry.stage(), error = %err, "Direct encoding failed, cleaning entry");

    let cleaned = clean_entry(entry)
        .map_err(|e| e.to_string())
        .and_then(|value| serde_json::to_string(&value).map_err(|e| e.to_string()));

    match cleaned {
        Ok(line) => Encoded::Cleaned(line),
        Err(reason) => {
            warn!(stage = entry.stage(), %reason, "Trace entry is unprocessable, writing sentinel");
            Encoded::Sentinel(sentinel(entry).to_string())
        }
    }
}

/// Cleaned copy of a whole entry in the wire shape
pub fn clean_entry(entry: &TraceEntry) -> Result<Value, CleanError> {
    let mut record = Map::new();
    record.insert(
        "timestamp".to_string(),
        Value::String(entry.timestamp().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    );
    record.insert("stage".to_string(), Value::String(entry.stage().to_string()));
    record.insert(
        "type".to_string(),
        Value::String(entry.kind().as_str().to_string()),
    );
    record.insert("content".to_string(), clean_value(entry.content())?);

    Ok(Value::Object(record))
}

/// Recursively clean a value into something JSON can always encode
pub fn clean_value(value: &TraceValue) -> Result<Value, CleanError> {
    clean_at(value, 0)
}

fn clean_at(value: &TraceValue, depth: usize) -> Result<Value, CleanError> {
    if depth > MAX_DEPTH {
        return Err(CleanError::TooDeep { limit: MAX_DEPTH });
    }

    let cleaned = match value {
        TraceValue::Null => Value::Null,
        TraceValue::Bool(b) => Value::Bool(*b),
        TraceValue::Number(n) => Value::Number(n.clone()),
        TraceValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        TraceValue::Text(text) => Value::String(escape_text(text)),
        TraceValue::Seq(items) => Value::Array(
            items
                .iter()
                .map(|item| clean_at(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        TraceValue::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = key_text(key, depth + 1)?;
                if map.contains_key(&key) {
                    return Err(CleanError::DuplicateKey { key });
                }
                map.insert(key, clean_at(value, depth + 1)?);
            }
            Value::Object(map)
        }
        TraceValue::Opaque(opaque) => match &opaque.repr {
            Some(repr) => Value::String(escape_text(repr)),
            None => {
                return Err(CleanError::Unrepresentable {
                    type_name: opaque.type_name.clone(),
                })
            }
        },
    };

    Ok(cleaned)
}

fn key_text(key: &TraceValue, depth: usize) -> Result<String, CleanError> {
    match key {
        TraceValue::Text(text) => Ok(escape_text(text)),
        other => match clean_at(other, depth)? {
            Value::String(text) => Ok(text),
            _ => Ok(escape_text(&other.to_string())),
        },
    }
}

/// Sentinel record standing in for an entry that cannot be encoded
pub fn sentinel(entry: &TraceEntry) -> Value {
    json!({
        "error": UNPROCESSABLE_ENTRY,
        "raw": format!("{:?}", entry),
    })
}

/// Escape backslash, double quote, newline, carriage return and tab
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Inverse of [`escape_text`]
pub fn unescape_text(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }

        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('"') => unescaped.push('"'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('t') => unescaped.push('\t'),
            Some(other) => {
                unescaped.push('\\');
                unescaped.push(other);
            }
            None => unescaped.push('\\'),
        }
    }

    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Opaque, TraceKind};

    fn parse(encoded: &Encoded) -> Value {
        serde_json::from_str(encoded.as_str()).unwrap()
    }

    #[test]
    fn test_plain_entry_encodes_directly() {
        let entry = TraceEntry::new("writer", TraceKind::Prompt, "say \"hi\"\\\n");
        let encoded = encode_entry(&entry);

        assert!(matches!(encoded, Encoded::Direct(_)));
        assert!(!encoded.as_str().contains('\n'));
        assert_eq!(parse(&encoded)["content"], "say \"hi\"\\\n");
    }

    #[test]
    fn test_non_finite_float_degrades_to_text() {
        let entry = TraceEntry::new(
            "critic",
            TraceKind::Info,
            TraceValue::map([("score", TraceValue::Float(f64::NAN))]),
        );
        let encoded = encode_entry(&entry);

        assert!(matches!(encoded, Encoded::Cleaned(_)));
        assert_eq!(parse(&encoded)["content"]["score"], "NaN");
    }

    #[test]
    fn test_non_text_keys_are_coerced() {
        let entry = TraceEntry::new(
            "critic",
            TraceKind::Info,
            TraceValue::Map(vec![
                (TraceValue::from(7u64), TraceValue::from("seven")),
                (TraceValue::Bool(true), TraceValue::Null),
            ]),
        );
        let record = parse(&encode_entry(&entry));

        assert_eq!(record["content"]["7"], "seven");
        assert_eq!(record["content"]["true"], Value::Null);
        assert_eq!(record["type"], "INFO");
    }

    #[test]
    fn test_cleaned_text_is_escaped_and_reversible() {
        let text = "line one\n\t\"quoted\" C:\\path\r";
        let entry = TraceEntry::new(
            "critic",
            TraceKind::RawResponse,
            TraceValue::map([
                ("raw_response", TraceValue::from(text)),
                ("handle", Opaque::new("Conn", Some("Conn#3".to_string())).into()),
            ]),
        );
        let encoded = encode_entry(&entry);
        assert!(matches!(encoded, Encoded::Cleaned(_)));

        let record = parse(&encoded);
        let stored = record["content"]["raw_response"].as_str().unwrap();
        assert!(!stored.contains('\n'));
        assert_eq!(unescape_text(stored), text);
        assert_eq!(record["content"]["handle"], "Conn#3");
    }

    #[test]
    fn test_unrepresentable_value_yields_sentinel() {
        let entry = TraceEntry::new("writer", TraceKind::Info, Opaque::unrepresentable("RawFd"));
        let encoded = encode_entry(&entry);

        assert!(matches!(encoded, Encoded::Sentinel(_)));
        let record = parse(&encoded);
        assert_eq!(record["error"], UNPROCESSABLE_ENTRY);
        assert!(record["raw"].as_str().unwrap().contains("RawFd"));
    }

    #[test]
    fn test_excessive_nesting_yields_sentinel() {
        let mut value = TraceValue::Opaque(Opaque::unrepresentable("Leaf"));
        for _ in 0..(MAX_DEPTH + 5) {
            value = TraceValue::Seq(vec![value]);
        }
        assert!(matches!(
            clean_value(&value),
            Err(CleanError::TooDeep { limit: MAX_DEPTH })
        ));

        let entry = TraceEntry::new("writer", TraceKind::Info, value);
        assert!(matches!(encode_entry(&entry), Encoded::Sentinel(_)));
    }

    #[test]
    fn test_colliding_keys_yield_sentinel() {
        let content = TraceValue::Map(vec![
            (TraceValue::from("1"), TraceValue::from("text key")),
            (TraceValue::from(1u64), TraceValue::from("int key")),
            (TraceValue::from("ratio"), TraceValue::Float(f64::NAN)),
        ]);
        assert_eq!(
            clean_value(&content),
            Err(CleanError::DuplicateKey {
                key: "1".to_string()
            })
        );

        let entry = TraceEntry::new("critic", TraceKind::Info, content);
        let encoded = encode_entry(&entry);
        assert!(matches!(encoded, Encoded::Sentinel(_)));

        let raw = parse(&encoded)["raw"].as_str().unwrap().to_string();
        assert!(raw.contains("text key"));
        assert!(raw.contains("int key"));
    }

    #[test]
    fn test_cleaned_record_keeps_stage_name_verbatim() {
        let entry = TraceEntry::new(
            "critic\tv2 \"beta\"",
            TraceKind::Info,
            TraceValue::map([("score", TraceValue::Float(f64::INFINITY))]),
        );
        let encoded = encode_entry(&entry);

        assert!(matches!(encoded, Encoded::Cleaned(_)));
        assert_eq!(parse(&encoded)["stage"], "critic\tv2 \"beta\"");
    }

    #[test]
    fn test_escape_round_trip() {
        let samples = [
            "",
            "plain",
            "\\",
            "\\n literal",
            "quote \" and tab \t",
            "mixed \\\"\n\r\t end\\",
            "unicode: 日本語 ✓",
        ];

        for sample in samples {
            let escaped = escape_text(sample);
            assert!(!escaped.contains('\n') && !escaped.contains('\t'));
            assert_eq!(unescape_text(&escaped), sample);
        }
    }
}
