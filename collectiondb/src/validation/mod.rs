use crate::config::ValidationMode;
use crate::error::{CollectionDbError, Result};
use crate::schema::{ObjectSchema, SchemaNode};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// A single way in which a document fails its collection schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Dotted path to the offending field (`meta.source`, `tags[2]`).
    pub field: String,
    pub constraint: Constraint,
    pub actual: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Required,
    Type { expected: String },
    Enum { allowed: Vec<String> },
    AdditionalProperty,
}

/// The class of a JSON value, as reported in violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Missing,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Integer,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Missing => "missing",
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Constraint::Required => write!(f, "Required field '{}' is missing", self.field),
            Constraint::Type { expected } => write!(
                f,
                "Field '{}' expected {expected}, got {}",
                self.field, self.actual
            ),
            Constraint::Enum { allowed } => {
                write!(f, "Field '{}' is not one of {:?}", self.field, allowed)
            }
            Constraint::AdditionalProperty => write!(
                f,
                "Unexpected field '{}' (additionalProperties is false)",
                self.field
            ),
        }
    }
}

/// Result of validating a document
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Validate a document against its collection's root object schema.
/// Invalid input is reported through the result, never as an error.
pub fn validate_document(schema: &ObjectSchema, data: &Value) -> ValidationResult {
    match data.as_object() {
        Some(map) => validate_fields(schema, map),
        None => ValidationResult {
            violations: vec![Violation {
                field: "$".into(),
                constraint: Constraint::Type {
                    expected: "object".into(),
                },
                actual: ValueKind::of(data),
            }],
        },
    }
}

/// Validate the fields of an already-unwrapped document object.
pub fn validate_fields(schema: &ObjectSchema, fields: &Map<String, Value>) -> ValidationResult {
    let mut result = ValidationResult::default();
    validate_object(schema, fields, "", &mut result.violations);
    result
}

/// Apply the validation mode to a result. With validation on, any violation
/// rejects the document; with it off, violations are logged and handed back
/// as warnings.
pub fn enforce(
    mode: ValidationMode,
    collection: &str,
    result: ValidationResult,
) -> Result<Vec<Violation>> {
    if result.is_ok() {
        return Ok(Vec::new());
    }

    match mode {
        ValidationMode::On => Err(CollectionDbError::SchemaViolation {
            collection: collection.to_string(),
            violations: result.violations,
        }),
        ValidationMode::Off => {
            log::warn!(
                "Document validation failed for collection '{collection}' (accepted, validation is off): {}",
                result
                    .violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            Ok(result.violations)
        }
    }
}

fn validate_object(
    schema: &ObjectSchema,
    map: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<Violation>,
) {
    for field in &schema.required {
        if !map.contains_key(field) {
            out.push(Violation {
                field: join_path(prefix, field),
                constraint: Constraint::Required,
                actual: ValueKind::Missing,
            });
        }
    }

    for (key, value) in map {
        let path = join_path(prefix, key);
        match schema.property(key) {
            Some(property) => validate_node(&property.node, value, &path, out),
            None if !schema.additional_properties => out.push(Violation {
                field: path,
                constraint: Constraint::AdditionalProperty,
                actual: ValueKind::of(value),
            }),
            None => {}
        }
    }
}

fn validate_node(node: &SchemaNode, value: &Value, path: &str, out: &mut Vec<Violation>) {
    match node {
        SchemaNode::Any => {}
        SchemaNode::Object(schema) => match value.as_object() {
            Some(map) => validate_object(schema, map, path, out),
            None => type_mismatch(node, value, path, out),
        },
        SchemaNode::Array { items } => match value.as_array() {
            Some(elements) => {
                if let Some(items) = items {
                    for (i, element) in elements.iter().enumerate() {
                        validate_node(items, element, &format!("{path}[{i}]"), out);
                    }
                }
            }
            None => type_mismatch(node, value, path, out),
        },
        SchemaNode::String { enum_values } => match value.as_str() {
            Some(s) => {
                if let Some(allowed) = enum_values {
                    if !allowed.iter().any(|a| a == s) {
                        out.push(Violation {
                            field: path.to_string(),
                            constraint: Constraint::Enum {
                                allowed: allowed.clone(),
                            },
                            actual: ValueKind::String,
                        });
                    }
                }
            }
            None => type_mismatch(node, value, path, out),
        },
        SchemaNode::Number => {
            if !value.is_number() {
                type_mismatch(node, value, path, out);
            }
        }
        SchemaNode::Integer => {
            if !is_integral(value) {
                type_mismatch(node, value, path, out);
            }
        }
        SchemaNode::Boolean => {
            if !value.is_boolean() {
                type_mismatch(node, value, path, out);
            }
        }
        SchemaNode::Null => {
            if !value.is_null() {
                type_mismatch(node, value, path, out);
            }
        }
        SchemaNode::AnyOf(members) => {
            let matched = members.iter().any(|member| {
                let mut scratch = Vec::new();
                validate_node(member, value, path, &mut scratch);
                scratch.is_empty()
            });
            if !matched {
                type_mismatch(node, value, path, out);
            }
        }
    }
}

fn type_mismatch(node: &SchemaNode, value: &Value, path: &str, out: &mut Vec<Violation>) {
    out.push(Violation {
        field: path.to_string(),
        constraint: Constraint::Type {
            expected: node.kind_name(),
        },
        actual: ValueKind::of(value),
    });
}

/// Whether a JSON value is a whole number, including floats like `3.0`.
pub fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => true,
        Value::Number(n) => n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
        _ => false,
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::check_schema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_schema() -> ObjectSchema {
        check_schema(
            "tasks",
            &json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "order": { "type": "number" },
                    "done": { "type": "boolean" },
                    "priority": { "type": "string", "enum": ["low", "high"] },
                    "estimate": { "type": "integer" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "owner": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "email": { "type": ["string", "null"] }
                        },
                        "required": ["name"],
                        "additionalProperties": false
                    }
                },
                "required": ["summary", "order"]
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_document() {
        let data = json!({
            "summary": "Write release notes",
            "order": 1,
            "done": false,
            "priority": "high",
            "estimate": 3.0,
            "tags": ["docs"],
            "owner": { "name": "Sam", "email": null },
            "extra": "allowed at the root"
        });
        let result = validate_document(&test_schema(), &data);
        assert!(result.is_ok(), "Violations: {:?}", result.violations);
    }

    #[test]
    fn test_missing_required_field() {
        let result = validate_document(&test_schema(), &json!({ "order": 1 }));
        assert_eq!(
            result.violations,
            vec![Violation {
                field: "summary".into(),
                constraint: Constraint::Required,
                actual: ValueKind::Missing,
            }]
        );
    }

    #[test]
    fn test_primitive_type_mismatch() {
        let data = json!({ "summary": 42, "order": "first", "done": "yes" });
        let result = validate_document(&test_schema(), &data);
        let fields: Vec<_> = result.violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["done", "order", "summary"]);
        assert_eq!(result.violations[2].actual, ValueKind::Integer);
        assert_eq!(
            result.violations[2].to_string(),
            "Field 'summary' expected string, got integer"
        );
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let data = json!({ "summary": "s", "order": 1, "estimate": 2.5 });
        let result = validate_document(&test_schema(), &data);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].field, "estimate");
    }

    #[test]
    fn test_enum_violation() {
        let data = json!({ "summary": "s", "order": 1, "priority": "urgent" });
        let result = validate_document(&test_schema(), &data);
        assert!(matches!(
            result.violations[0].constraint,
            Constraint::Enum { .. }
        ));
    }

    #[test]
    fn test_nested_object_and_array_paths() {
        let data = json!({
            "summary": "s",
            "order": 1,
            "tags": ["ok", 7],
            "owner": { "email": 5, "nickname": "x" }
        });
        let result = validate_document(&test_schema(), &data);
        let fields: Vec<_> = result.violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["owner.name", "owner.email", "owner.nickname", "tags[1]"]
        );
        assert!(matches!(
            result.violations[2].constraint,
            Constraint::AdditionalProperty
        ));
    }

    #[test]
    fn test_non_object_document() {
        let result = validate_document(&test_schema(), &json!(["not", "an", "object"]));
        assert_eq!(result.violations[0].field, "$");
        assert_eq!(result.violations[0].actual, ValueKind::Array);
    }

    #[test]
    fn test_enforce_on_rejects() {
        let result = validate_document(&test_schema(), &json!({ "order": 1 }));
        let err = enforce(ValidationMode::On, "tasks", result).unwrap_err();
        assert!(matches!(err, CollectionDbError::SchemaViolation { ref violations, .. } if violations.len() == 1));
        assert!(err.to_string().contains("Required field 'summary' is missing"));
    }

    #[test]
    fn test_enforce_off_returns_warnings() {
        let result = validate_document(&test_schema(), &json!({ "order": 1 }));
        let warnings = enforce(ValidationMode::Off, "tasks", result).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_enforce_valid_is_silent() {
        let result = validate_document(&test_schema(), &json!({ "summary": "s", "order": 1 }));
        assert!(enforce(ValidationMode::On, "tasks", result).unwrap().is_empty());
    }
}
