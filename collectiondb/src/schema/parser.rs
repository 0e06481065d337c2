use super::types::{NewCollectionType, ObjectSchema, Property, SchemaNode};
use crate::error::{CollectionDbError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const COLLECTION_NAME_PATTERN: &str = r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,63}$";

/// Parse a schema JSON string into a SchemaNode
pub fn parse_schema_str(content: &str) -> Result<SchemaNode> {
    let value: Value = serde_json::from_str(content)?;
    parse_schema_node(&value)
}

/// Parse a JSON-Schema-like value into a tagged SchemaNode tree
pub fn parse_schema_node(value: &Value) -> Result<SchemaNode> {
    parse_at(value, "$")
}

fn parse_at(value: &Value, path: &str) -> Result<SchemaNode> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(format!("'{path}' must be a schema object")))?;

    match obj.get("type") {
        None if obj.contains_key("properties") => parse_typed("object", obj, path),
        None => Ok(SchemaNode::Any),
        Some(Value::String(type_name)) => parse_typed(type_name, obj, path),
        Some(Value::Array(type_names)) => {
            let mut members = Vec::with_capacity(type_names.len());
            for t in type_names {
                let type_name = t
                    .as_str()
                    .ok_or_else(|| invalid(format!("'{path}.type' entries must be strings")))?;
                members.push(parse_typed(type_name, obj, path)?);
            }
            if members.is_empty() {
                return Err(invalid(format!("'{path}.type' must not be empty")));
            }
            Ok(SchemaNode::AnyOf(members))
        }
        Some(_) => Err(invalid(format!(
            "'{path}.type' must be a string or a list of strings"
        ))),
    }
}

fn parse_typed(type_name: &str, obj: &Map<String, Value>, path: &str) -> Result<SchemaNode> {
    match type_name {
        "object" => parse_object(obj, path).map(SchemaNode::Object),
        "array" => {
            let items = match obj.get("items") {
                Some(items) => Some(Box::new(parse_at(items, &format!("{path}[]"))?)),
                None => None,
            };
            Ok(SchemaNode::Array { items })
        }
        "string" => {
            let enum_values = match obj.get("enum") {
                None => None,
                Some(Value::Array(values)) => Some(
                    values
                        .iter()
                        .map(|v| {
                            v.as_str().map(str::to_string).ok_or_else(|| {
                                invalid(format!("'{path}.enum' entries must be strings"))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                Some(_) => return Err(invalid(format!("'{path}.enum' must be a list"))),
            };
            Ok(SchemaNode::String { enum_values })
        }
        "number" => Ok(SchemaNode::Number),
        "integer" => Ok(SchemaNode::Integer),
        "boolean" => Ok(SchemaNode::Boolean),
        "null" => Ok(SchemaNode::Null),
        other => Err(invalid(format!("'{path}' has unsupported type '{other}'"))),
    }
}

fn parse_object(obj: &Map<String, Value>, path: &str) -> Result<ObjectSchema> {
    let mut properties = BTreeMap::new();
    match obj.get("properties") {
        None => {}
        Some(Value::Object(props)) => {
            for (name, prop) in props {
                let node = parse_at(prop, &format!("{path}.{name}"))?;
                let description = prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .map(str::to_string);
                properties.insert(name.clone(), Property { node, description });
            }
        }
        Some(_) => return Err(invalid(format!("'{path}.properties' must be an object"))),
    }

    let required = match obj.get("required") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|n| {
                n.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("'{path}.required' entries must be strings")))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(invalid(format!("'{path}.required' must be a list"))),
    };

    // A sub-schema for additionalProperties is treated as "allowed".
    let additional_properties = obj
        .get("additionalProperties")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    Ok(ObjectSchema {
        properties,
        required,
        additional_properties,
    })
}

/// Shape-check a collection schema: a root object that requires a string
/// `summary` and a numeric `order`.
pub fn check_schema(collection_name: &str, schema: &Value) -> Result<ObjectSchema> {
    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        return Err(invalid(format!(
            "schema of '{collection_name}' must have type 'object'"
        )));
    }

    let root = match parse_schema_node(schema)? {
        SchemaNode::Object(root) => root,
        other => {
            return Err(invalid(format!(
                "schema of '{collection_name}' must be an object schema, got {}",
                other.kind_name()
            )))
        }
    };

    let has_summary = matches!(
        root.property("summary").map(|p| &p.node),
        Some(SchemaNode::String { .. })
    );
    if !has_summary || !root.requires("summary") {
        return Err(CollectionDbError::SchemaMissingSummary(
            collection_name.to_string(),
        ));
    }

    let has_order = root
        .property("order")
        .map(|p| p.node.is_numeric())
        .unwrap_or(false);
    if !has_order || !root.requires("order") {
        return Err(invalid(format!(
            "schema of '{collection_name}' must declare a required 'order' property of type number"
        )));
    }

    Ok(root)
}

/// Check a collection type submitted for registration.
pub fn check_collection_type(new_type: &NewCollectionType) -> Result<ObjectSchema> {
    if new_type.id.trim().is_empty() {
        return Err(CollectionDbError::MalformedInput(
            "collection type 'id' must not be empty".into(),
        ));
    }
    if new_type.name.trim().is_empty() {
        return Err(CollectionDbError::MalformedInput(
            "collection type 'name' must not be empty".into(),
        ));
    }

    let pattern = Regex::new(COLLECTION_NAME_PATTERN)
        .map_err(|e| CollectionDbError::InvalidSchema(e.to_string()))?;
    if !pattern.is_match(&new_type.collection_name) {
        return Err(CollectionDbError::MalformedInput(format!(
            "collection_name '{}' must match {COLLECTION_NAME_PATTERN}",
            new_type.collection_name
        )));
    }

    check_schema(&new_type.collection_name, &new_type.schema)
}

fn invalid(message: String) -> CollectionDbError {
    CollectionDbError::InvalidSchema(message)
}
