//! Lenient readers for processor parameters.
//!
//! Scalars that are missing or malformed fall back to the caller's default and
//! the fallback is logged at warn level. Column references are read strictly by
//! the `check_*` helpers used from `Processor::validate`.

use serde_json::Value;

use crate::error::ProcessError;
use crate::model::ParameterBag;

/// Reads a number given either as a JSON number or a numeric string.
pub(crate) fn number(params: &ParameterBag, name: &str) -> Option<f64> {
    match params.get(name)? {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                log::warn!("Parameter '{}' is not a number ({:?}), using default", name, s);
                None
            }
        },
        other => {
            log::warn!("Parameter '{}' is not a number ({}), using default", name, other);
            None
        }
    }
}

pub(crate) fn number_or(params: &ParameterBag, name: &str, default: f64) -> f64 {
    number(params, name).unwrap_or(default)
}

/// Reads an integer. Fractional numbers are truncated.
pub(crate) fn integer(params: &ParameterBag, name: &str) -> Option<i64> {
    match params.get(name)? {
        Value::Number(n) if n.is_i64() => n.as_i64(),
        _ => number(params, name).map(|v| v.trunc() as i64),
    }
}

pub(crate) fn string(params: &ParameterBag, name: &str) -> Option<String> {
    match params.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Reads a list of names. A single string is accepted as a one-element list.
pub(crate) fn string_list(params: &ParameterBag, name: &str) -> Option<Vec<String>> {
    match params.get(name)? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

pub(crate) fn check_string(params: &ParameterBag, name: &str) -> Result<(), ProcessError> {
    match params.get(name) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(ProcessError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a column name, got {}", other),
        }),
    }
}

pub(crate) fn check_string_list(params: &ParameterBag, name: &str) -> Result<(), ProcessError> {
    match params.get(name) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(other) => Err(ProcessError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a list of column names, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> ParameterBag {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_number_accepts_numeric_strings() {
        let params = bag(json!({"a": 2.5, "b": "3", "c": "abc", "d": true}));
        assert_eq!(number(&params, "a"), Some(2.5));
        assert_eq!(number(&params, "b"), Some(3.0));
        assert_eq!(number(&params, "c"), None);
        assert_eq!(number(&params, "d"), None);
        assert_eq!(number(&params, "missing"), None);
        assert_eq!(number_or(&params, "c", 1.0), 1.0);
    }

    #[test]
    fn test_integer_truncates() {
        let params = bag(json!({"w": 3, "f": 4.9, "s": "7"}));
        assert_eq!(integer(&params, "w"), Some(3));
        assert_eq!(integer(&params, "f"), Some(4));
        assert_eq!(integer(&params, "s"), Some(7));
    }

    #[test]
    fn test_string_list_accepts_single_name() {
        let params = bag(json!({"one": "x", "many": ["x", "y"], "bad": 5}));
        assert_eq!(string_list(&params, "one"), Some(vec!["x".to_string()]));
        assert_eq!(
            string_list(&params, "many"),
            Some(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(string_list(&params, "bad"), None);
    }

    #[test]
    fn test_checks_reject_wrong_shapes() {
        let params = bag(json!({"col": 1, "cols": ["a", 2]}));
        assert!(check_string(&params, "col").is_err());
        assert!(check_string_list(&params, "cols").is_err());
        assert!(check_string(&params, "absent").is_ok());
    }
}
