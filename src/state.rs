//! Runtime value and field-state types shared by every evaluation layer.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 値の型システム。フォームのフィールド値はこの4種に正規化される。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Canonical string form used by condition evaluation and calculation
    /// substitution. Null renders as the empty string; whole numbers drop
    /// the trailing `.0`.
    pub fn coerce_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => {
                // integer formatting only where the i64 cast is exact
                if n.fract() == 0.0 && n.is_finite() && n.abs() <= 9.007_199_254_740_992e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
        }
    }

    /// Numeric view. Null and the empty string read as zero; anything that
    /// does not parse reads as None.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => Some(0.0),
            Value::Boolean(_) => None,
            Value::Number(n) => Some(*n),
            Value::String(s) => {
                if s.is_empty() {
                    Some(0.0)
                } else {
                    s.parse().ok()
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coerce_string())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// A record is a flat map of field key to value.
pub type RecordData = HashMap<String, Value>;

/// Per-field UI state. All flags default to false (visible, optional,
/// editable, no error).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl FieldState {
    /// An error only counts when the message is non-empty.
    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

pub type FieldStateMap = HashMap<String, FieldState>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_coerce_string() {
        assert_eq!(Value::Null.coerce_string(), "");
        assert_eq!(Value::Boolean(true).coerce_string(), "true");
        assert_eq!(Value::Number(3.0).coerce_string(), "3");
        assert_eq!(Value::Number(2.5).coerce_string(), "2.5");
        assert_eq!(Value::String("Open".to_string()).coerce_string(), "Open");
    }

    #[test]
    fn test_coerce_string_large_magnitudes() {
        // whole numbers beyond exact i64 range must not saturate
        assert_eq!(
            Value::Number(1e20).coerce_string(),
            "100000000000000000000"
        );
        assert_eq!(
            Value::Number(-1e20).coerce_string(),
            "-100000000000000000000"
        );
        assert_eq!(Value::Number(f64::INFINITY).coerce_string(), "inf");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::Null.as_f64(), Some(0.0));
        assert_eq!(Value::String(String::new()).as_f64(), Some(0.0));
        assert_eq!(Value::String("4.5".to_string()).as_f64(), Some(4.5));
        assert_eq!(Value::String("abc".to_string()).as_f64(), None);
        assert_eq!(Value::Boolean(true).as_f64(), None);
    }

    #[test]
    fn test_untagged_serde_round_trip() {
        let json = r#"{"state":"open","priority":3.0,"active":true,"notes":null}"#;
        let record: RecordData = serde_json::from_str(json).unwrap();
        assert_eq!(record["state"], Value::String("open".to_string()));
        assert_eq!(record["priority"], Value::Number(3.0));
        assert_eq!(record["active"], Value::Boolean(true));
        assert_eq!(record["notes"], Value::Null);

        let out = serde_json::to_string(&record).unwrap();
        let back: RecordData = serde_json::from_str(&out).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_field_state_error_must_be_non_empty() {
        let mut state = FieldState::default();
        assert!(!state.has_error());
        state.error = Some(String::new());
        assert!(!state.has_error());
        state.error = Some("required".to_string());
        assert!(state.has_error());
    }

    #[test]
    fn test_field_state_serde_is_camel_case() {
        let state = FieldState {
            is_hidden: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("isHidden"));
        assert!(json.contains("isReadOnly"));
    }
}
