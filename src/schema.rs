//! Schema Validator (§2 system overview; §4.5, S6).
//!
//! Validates opaque data blobs against a schema reference. The schema
//! format itself is not specified by `spec.md`; this is a small structural
//! JSON-shape validator (type + required properties, recursively) good
//! enough to reject `{x: "hello"}` against `{x: integer}` with a pointer
//! into the offending field, as S6 requires.

use crate::error::Error;
use serde_json::Value;

pub trait SchemaValidator: Send + Sync {
    /// Returns `Ok(())` if `data` conforms to `schema`, otherwise
    /// `Err(Error::InvalidInput)` with a JSON-pointer-shaped path into the
    /// first violation found.
    fn validate(&self, data: &Value, schema: &Value) -> Result<(), Error>;
}

#[derive(Default)]
pub struct StructuralValidator;

impl SchemaValidator for StructuralValidator {
    fn validate(&self, data: &Value, schema: &Value) -> Result<(), Error> {
        validate_at("", data, schema)
    }
}

fn validate_at(pointer: &str, data: &Value, schema: &Value) -> Result<(), Error> {
    let Some(schema_obj) = schema.as_object() else {
        // A schema that isn't an object imposes no constraints.
        return Ok(());
    };

    if let Some(expected_type) = schema_obj.get("type").and_then(Value::as_str) {
        check_type(pointer, data, expected_type)?;
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        let data_obj = data.as_object();
        let required: Vec<&str> = schema_obj
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for field in &required {
            if data_obj.map(|o| !o.contains_key(*field)).unwrap_or(true) {
                return Err(Error::invalid_input(
                    format!("{pointer}/{field}"),
                    "required field is missing",
                ));
            }
        }

        if let Some(data_obj) = data_obj {
            for (key, field_schema) in properties {
                if let Some(value) = data_obj.get(key) {
                    validate_at(&format!("{pointer}/{key}"), value, field_schema)?;
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        if let Some(items) = data.as_array() {
            for (i, item) in items.iter().enumerate() {
                validate_at(&format!("{pointer}/{i}"), item, item_schema)?;
            }
        }
    }

    Ok(())
}

fn check_type(pointer: &str, data: &Value, expected_type: &str) -> Result<(), Error> {
    let matches = match expected_type {
        "object" => data.is_object(),
        "array" => data.is_array(),
        "string" => data.is_string(),
        "integer" => data.is_i64() || data.is_u64(),
        "number" => data.is_number(),
        "boolean" => data.is_boolean(),
        "null" => data.is_null(),
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::invalid_input(
            pointer.to_string(),
            format!("expected type {expected_type}, got {}", describe(data)),
        ))
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_type_with_pointer() {
        let validator = StructuralValidator;
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}},
            "required": ["x"],
        });
        let data = serde_json::json!({"x": "hello"});
        let err = validator.validate(&data, &schema).unwrap_err();
        match err {
            Error::InvalidInput { pointer, .. } => assert_eq!(pointer, "/x"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_required_field() {
        let validator = StructuralValidator;
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}},
            "required": ["x"],
        });
        let data = serde_json::json!({});
        assert!(validator.validate(&data, &schema).is_err());
    }

    #[test]
    fn accepts_conforming_data() {
        let validator = StructuralValidator;
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}},
            "required": ["x"],
        });
        let data = serde_json::json!({"x": 5});
        assert!(validator.validate(&data, &schema).is_ok());
    }
}
