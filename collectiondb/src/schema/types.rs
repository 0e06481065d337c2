use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Registry entry describing a dynamic collection and the shape its documents must have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionType {
    pub id: String,
    pub name: String,
    pub collection_name: String,
    #[serde(default)]
    pub description: String,
    /// Schema document as it was registered. Parsed on demand with
    /// [`CollectionType::document_schema`] so malformed persisted records can
    /// still be listed.
    pub schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionType {
    /// Parse and shape-check the registered schema.
    pub fn document_schema(&self) -> Result<ObjectSchema> {
        super::parser::check_schema(&self.collection_name, &self.schema)
    }

    /// Whether the raw schema lists `field` in its top-level `required` array.
    pub fn requires(&self, field: &str) -> bool {
        self.schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().any(|f| f.as_str() == Some(field)))
            .unwrap_or(false)
    }
}

/// A collection type as submitted for registration, before timestamps are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCollectionType {
    pub id: String,
    pub name: String,
    pub collection_name: String,
    #[serde(default)]
    pub description: String,
    pub schema: serde_json::Value,
}

/// Metadata changes accepted by [`crate::registry::Registry::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionTypeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A node of a JSON-Schema-like document shape.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Object(ObjectSchema),
    Array { items: Option<Box<SchemaNode>> },
    String { enum_values: Option<Vec<String>> },
    Number,
    Integer,
    Boolean,
    Null,
    /// A `type` list: the value must match at least one member.
    AnyOf(Vec<SchemaNode>),
    /// No `type` keyword: anything goes.
    Any,
}

impl SchemaNode {
    pub fn kind_name(&self) -> String {
        match self {
            SchemaNode::Object(_) => "object".into(),
            SchemaNode::Array { .. } => "array".into(),
            SchemaNode::String { .. } => "string".into(),
            SchemaNode::Number => "number".into(),
            SchemaNode::Integer => "integer".into(),
            SchemaNode::Boolean => "boolean".into(),
            SchemaNode::Null => "null".into(),
            SchemaNode::AnyOf(nodes) => nodes
                .iter()
                .map(|n| n.kind_name())
                .collect::<Vec<_>>()
                .join(" | "),
            SchemaNode::Any => "any".into(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SchemaNode::Number | SchemaNode::Integer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, Property>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl ObjectSchema {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn requires(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub node: SchemaNode,
    pub description: Option<String>,
}
