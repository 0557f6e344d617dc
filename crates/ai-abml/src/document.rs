//! Raw (uncompiled) document shape as read from YAML or JSON.
//!
//! Only the outer structure is typed here. Action lists stay as [`Value`]s because actions come
//! in both explicit (`{type: emit, point: ready}`) and shorthand (`{emit: ready}`) forms; the
//! compiler normalizes them and reports problems with their locations.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use ai_core::Value;
use serde::{Deserialize, Serialize};

use crate::error::{AbmlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[default]
    Behavior,
    Cutscene,
    Dialogue,
    Dialplan,
    Timeline,
    Cognition,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Behavior => "behavior",
            DocumentType::Cutscene => "cutscene",
            DocumentType::Dialogue => "dialogue",
            DocumentType::Dialplan => "dialplan",
            DocumentType::Timeline => "timeline",
            DocumentType::Cognition => "cognition",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub id: Option<String>,
    pub description: Option<String>,
    /// Anything else the authoring tools attach.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawGoal {
    pub priority: i32,
    /// Key to condition in string form (`"<= 0.3"`) or a bare value.
    pub conditions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDocument {
    #[serde(rename = "documentType", alias = "document_type")]
    pub document_type: DocumentType,
    pub version: Option<String>,
    pub metadata: Metadata,
    /// Document-scope defaults; caller-supplied values win.
    pub variables: BTreeMap<String, Value>,
    pub goals: BTreeMap<String, RawGoal>,
    pub flows: BTreeMap<String, Vec<Value>>,
    pub channels: BTreeMap<String, Vec<Value>>,
    /// Error code (snake_case) or `default` to handler action list.
    pub errors: BTreeMap<String, Vec<Value>>,
}

impl RawDocument {
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).map_err(|err| AbmlError::Parse {
            message: err.to_string(),
        })
    }

    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|err| AbmlError::Parse {
            message: err.to_string(),
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.metadata
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Parse a duration given as milliseconds (`500`) or with a unit (`"500ms"`, `"2s"`, `"1m"`).
pub fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(ms) if ms.is_finite() && *ms >= 0.0 => {
            Some(Duration::from_micros((ms * 1000.0).round() as u64))
        }
        Value::String(s) => {
            let s = s.trim();
            let (number, scale_ms) = if let Some(n) = s.strip_suffix("ms") {
                (n, 1.0)
            } else if let Some(n) = s.strip_suffix('s') {
                (n, 1000.0)
            } else if let Some(n) = s.strip_suffix('m') {
                (n, 60_000.0)
            } else {
                (s, 1.0)
            };
            let n: f64 = number.trim().parse().ok()?;
            if !n.is_finite() || n < 0.0 {
                return None;
            }
            Some(Duration::from_micros((n * scale_ms * 1000.0).round() as u64))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(
            parse_duration(&Value::from(250)),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_duration(&Value::from("500ms")),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_duration(&Value::from("2s")), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration(&Value::from("1m")), Some(Duration::from_secs(60)));
        assert_eq!(
            parse_duration(&Value::from("1.5s")),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_duration(&Value::from("soon")), None);
        assert_eq!(parse_duration(&Value::from(-1)), None);
    }

    #[test]
    fn document_type_accepts_both_spellings() {
        let doc = RawDocument::from_yaml("documentType: cutscene\nmetadata: { id: intro }\n").unwrap();
        assert_eq!(doc.document_type, DocumentType::Cutscene);
        assert_eq!(doc.id(), Some("intro"));

        let doc = RawDocument::from_yaml("document_type: dialogue\n").unwrap();
        assert_eq!(doc.document_type, DocumentType::Dialogue);
        assert_eq!(doc.id(), None);
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = RawDocument::from_yaml("flows: [unclosed").unwrap_err();
        assert_eq!(err.code(), ai_core::ErrorCode::CompileError);
    }
}
