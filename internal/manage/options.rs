use crate::errors::{ManageError, ManageResult};
use serde_json::{Map, Value};

pub type Options = Map<String, Value>;

/// Option tables are closed: an unknown key is rejected before any side
/// effect, so a typo never half-applies a command.
pub fn ensure_allowed(options: &Options, allowed: &[&str]) -> ManageResult<()> {
    for key in options.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ManageError::InvalidArgument(format!(
                "unknown option: {key}"
            )));
        }
    }
    Ok(())
}

pub fn get_str(options: &Options, key: &str) -> ManageResult<Option<String>> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(wrong_type(key, "a string", other)),
    }
}

pub fn require_identifier(options: &Options, key: &str) -> ManageResult<String> {
    match get_str(options, key)? {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ManageError::MissingIdentifier(key.to_string())),
    }
}

pub fn require_str(options: &Options, key: &str) -> ManageResult<String> {
    match get_str(options, key)? {
        Some(text) => Ok(text),
        None => Err(ManageError::InvalidArgument(format!(
            "option {key} is required"
        ))),
    }
}

/// CLI flags arrive as strings; records loaded from a file carry real JSON
/// numbers. Both spellings are accepted.
pub fn get_u32(options: &Options, key: &str) -> ManageResult<Option<u32>> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|wide| u32::try_from(wide).ok())
            .map(Some)
            .ok_or_else(|| wrong_type(key, "an unsigned 32-bit integer", options.get(key).unwrap_or(&Value::Null))),
        Some(Value::String(text)) => text
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| wrong_type(key, "an unsigned 32-bit integer", options.get(key).unwrap_or(&Value::Null))),
        Some(other) => Err(wrong_type(key, "an unsigned 32-bit integer", other)),
    }
}

pub fn get_bool(options: &Options, key: &str) -> ManageResult<Option<bool>> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(wrong_type(key, "a boolean", options.get(key).unwrap_or(&Value::Null))),
        },
        Some(other) => Err(wrong_type(key, "a boolean", other)),
    }
}

fn wrong_type(key: &str, expected: &str, got: &Value) -> ManageError {
    ManageError::InvalidArgumentType(format!("option {key} must be {expected}, got {got}"))
}

#[cfg(test)]
mod tests {
    use super::{
        ensure_allowed, get_bool, get_str, get_u32, require_identifier, require_str, Options,
    };
    use serde_json::json;

    fn options(value: serde_json::Value) -> Options {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let opts = options(json!({"name": "a1", "nmae": "oops"}));
        let err = ensure_allowed(&opts, &["name"]).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert!(err.message().contains("nmae"));
        ensure_allowed(&options(json!({"name": "a1"})), &["name"]).expect("allowed");
    }

    #[test]
    fn get_str_enforces_type() {
        let opts = options(json!({"name": "a1", "uid": 3}));
        assert_eq!(get_str(&opts, "name").expect("ok"), Some("a1".to_string()));
        assert_eq!(get_str(&opts, "missing").expect("ok"), None);
        let err = get_str(&opts, "uid").unwrap_err();
        assert_eq!(err.code(), "InvalidArgumentType");
    }

    #[test]
    fn require_identifier_rejects_missing_and_blank() {
        let err = require_identifier(&options(json!({})), "name").unwrap_err();
        assert_eq!(err.code(), "MissingIdentifier");
        let err = require_identifier(&options(json!({"name": "  "})), "name").unwrap_err();
        assert_eq!(err.code(), "MissingIdentifier");
        let name = require_identifier(&options(json!({"name": "a1"})), "name").expect("ok");
        assert_eq!(name, "a1");
    }

    #[test]
    fn require_str_uses_invalid_argument() {
        let err = require_str(&options(json!({})), "new_buckets_path").unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn get_u32_accepts_numbers_and_digit_strings() {
        let opts = options(json!({"a": 1001, "b": "1002", "c": "x", "d": -3, "e": true}));
        assert_eq!(get_u32(&opts, "a").expect("ok"), Some(1001));
        assert_eq!(get_u32(&opts, "b").expect("ok"), Some(1002));
        assert_eq!(get_u32(&opts, "missing").expect("ok"), None);
        for key in ["c", "d", "e"] {
            let err = get_u32(&opts, key).unwrap_err();
            assert_eq!(err.code(), "InvalidArgumentType", "{key}");
        }
    }

    #[test]
    fn get_bool_accepts_bool_and_strings() {
        let opts = options(json!({"a": true, "b": "false", "c": "maybe", "d": 1}));
        assert_eq!(get_bool(&opts, "a").expect("ok"), Some(true));
        assert_eq!(get_bool(&opts, "b").expect("ok"), Some(false));
        assert_eq!(get_bool(&opts, "missing").expect("ok"), None);
        for key in ["c", "d"] {
            let err = get_bool(&opts, key).unwrap_err();
            assert_eq!(err.code(), "InvalidArgumentType", "{key}");
        }
    }
}
