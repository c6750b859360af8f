//! Trace entries emitted by stages while they run.
//!
//! An entry is an immutable observation: when, which stage, what kind, and
//! the content. Content is a [`TraceValue`] tree which may hold values that
//! have no JSON form; the serializer in `core::sanitize` deals with those.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

/// Category tag of a trace entry (serialized under `type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceKind {
    /// Prompt sent to the text-generation service
    Prompt,

    /// Unprocessed reply from the text-generation service
    RawResponse,

    /// General progress note
    Info,

    /// A failure observed by the stage
    Error,

    /// The generated artifact failed validation
    ValidationError,

    /// A reply could not be decoded into the expected shape
    DecodingError,

    /// A stage invocation raised and was handed to the retry wrapper
    AttemptFailed,
}

impl TraceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceKind::Prompt => "PROMPT",
            TraceKind::RawResponse => "RAW_RESPONSE",
            TraceKind::Info => "INFO",
            TraceKind::Error => "ERROR",
            TraceKind::ValidationError => "VALIDATION_ERROR",
            TraceKind::DecodingError => "DECODING_ERROR",
            TraceKind::AttemptFailed => "ATTEMPT_FAILED",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value with no structured representation.
///
/// `repr` is its best-effort text form; when absent the value cannot be
/// rendered at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque {
    pub type_name: String,
    pub repr: Option<String>,
}

impl Opaque {
    pub fn new(type_name: impl Into<String>, repr: Option<String>) -> Self {
        Self {
            type_name: type_name.into(),
            repr,
        }
    }

    /// A value that has neither a structured nor a text form
    pub fn unrepresentable(type_name: impl Into<String>) -> Self {
        Self::new(type_name, None)
    }
}

/// Content of a trace entry, of arbitrary depth
#[derive(Debug, Clone, PartialEq)]
pub enum TraceValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Float(f64),
    Text(String),
    Seq(Vec<TraceValue>),
    /// Keys are values too; only text keys encode directly
    Map(Vec<(TraceValue, TraceValue)>),
    Opaque(Opaque),
}

impl TraceValue {
    /// Build a map with text keys
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<TraceValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        TraceValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (TraceValue::Text(k.into()), v.into()))
                .collect(),
        )
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TraceValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Look up a text key in a map value
    pub fn get(&self, key: &str) -> Option<&TraceValue> {
        match self {
            TraceValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_text() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl Serialize for TraceValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TraceValue::Null => serializer.serialize_unit(),
            TraceValue::Bool(b) => serializer.serialize_bool(*b),
            TraceValue::Number(n) => n.serialize(serializer),
            TraceValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            TraceValue::Float(f) => Err(S::Error::custom(format!(
                "non-finite number {} has no structured representation",
                f
            ))),
            TraceValue::Text(s) => serializer.serialize_str(s),
            TraceValue::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TraceValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    match key {
                        TraceValue::Text(k) => map.serialize_entry(k, value)?,
                        other => {
                            return Err(S::Error::custom(format!(
                                "map key {} is not text",
                                other
                            )))
                        }
                    }
                }
                map.end()
            }
            TraceValue::Opaque(opaque) => Err(S::Error::custom(format!(
                "value of type {} has no structured representation",
                opaque.type_name
            ))),
        }
    }
}

/// Best-effort text rendering, used when a value has to degrade to text
impl fmt::Display for TraceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceValue::Null => f.write_str("null"),
            TraceValue::Bool(b) => write!(f, "{}", b),
            TraceValue::Number(n) => write!(f, "{}", n),
            TraceValue::Float(x) => write!(f, "{}", x),
            TraceValue::Text(s) => f.write_str(s),
            TraceValue::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            TraceValue::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            TraceValue::Opaque(opaque) => match &opaque.repr {
                Some(repr) => f.write_str(repr),
                None => write!(f, "<{}>", opaque.type_name),
            },
        }
    }
}

impl From<&str> for TraceValue {
    fn from(value: &str) -> Self {
        TraceValue::Text(value.to_string())
    }
}

impl From<String> for TraceValue {
    fn from(value: String) -> Self {
        TraceValue::Text(value)
    }
}

impl From<bool> for TraceValue {
    fn from(value: bool) -> Self {
        TraceValue::Bool(value)
    }
}

impl From<i64> for TraceValue {
    fn from(value: i64) -> Self {
        TraceValue::Number(value.into())
    }
}

impl From<u64> for TraceValue {
    fn from(value: u64) -> Self {
        TraceValue::Number(value.into())
    }
}

impl From<u32> for TraceValue {
    fn from(value: u32) -> Self {
        TraceValue::Number(value.into())
    }
}

impl From<usize> for TraceValue {
    fn from(value: usize) -> Self {
        TraceValue::Number((value as u64).into())
    }
}

impl From<f64> for TraceValue {
    fn from(value: f64) -> Self {
        TraceValue::Float(value)
    }
}

impl From<Opaque> for TraceValue {
    fn from(value: Opaque) -> Self {
        TraceValue::Opaque(value)
    }
}

impl<T: Into<TraceValue>> From<Vec<T>> for TraceValue {
    fn from(value: Vec<T>) -> Self {
        TraceValue::Seq(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<TraceValue>> From<Option<T>> for TraceValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(TraceValue::Null, Into::into)
    }
}

impl From<serde_json::Value> for TraceValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => TraceValue::Null,
            Value::Bool(b) => TraceValue::Bool(b),
            Value::Number(n) => TraceValue::Number(n),
            Value::String(s) => TraceValue::Text(s),
            Value::Array(items) => TraceValue::Seq(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => TraceValue::Map(
                map.into_iter()
                    .map(|(k, v)| (TraceValue::Text(k), v.into()))
                    .collect(),
            ),
        }
    }
}

/// One logged observation.
///
/// Wire shape: `{"timestamp": ISO-8601, "stage": ..., "type": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    timestamp: DateTime<Utc>,
    stage: String,
    #[serde(rename = "type")]
    kind: TraceKind,
    content: TraceValue,
}

impl TraceEntry {
    /// Create a new entry stamped with the current time
    pub fn new(stage: impl Into<String>, kind: TraceKind, content: impl Into<TraceValue>) -> Self {
        Self::at(Utc::now(), stage, kind, content)
    }

    /// Create an entry with an explicit timestamp
    pub fn at(
        timestamp: DateTime<Utc>,
        stage: impl Into<String>,
        kind: TraceKind,
        content: impl Into<TraceValue>,
    ) -> Self {
        Self {
            timestamp,
            stage: stage.into(),
            kind,
            content: content.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    pub fn content(&self) -> &TraceValue {
        &self.content
    }
}

/// Private trace buffer handed to one stage invocation.
///
/// The executor drains it into the run's aggregate log once the stage
/// returns, whatever the outcome.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    stage: String,
    entries: Vec<TraceEntry>,
}

impl TraceBuffer {
    pub fn for_stage(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            entries: Vec::new(),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Append an entry attributed to this buffer's stage
    pub fn record(&mut self, kind: TraceKind, content: impl Into<TraceValue>) {
        self.entries
            .push(TraceEntry::new(self.stage.clone(), kind, content));
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of a given kind
    pub fn count(&self, kind: TraceKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn into_entries(self) -> Vec<TraceEntry> {
        self.entries
    }
}
