// Stored documents and the soft-delete state every read path filters on

use crate::error::{CollectionDbError, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Key under which the store-assigned identifier is rendered.
pub const STORE_ID_FIELD: &str = "_id";
/// Caller data under this key is stripped on insert.
pub const DELETED_FIELD: &str = "deleted";
pub const ORDER_FIELD: &str = "order";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    Live,
    Deleted,
}

impl DocState {
    pub fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            DocState::Live
        } else {
            DocState::Deleted
        }
    }

    pub fn as_flag(self) -> i64 {
        match self {
            DocState::Live => 0,
            DocState::Deleted => 1,
        }
    }
}

/// A document as held by a collection's backing namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// ULID assigned by the store on insert.
    pub store_id: String,
    pub order: i64,
    pub state: DocState,
    pub created_at: DateTime<Utc>,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn is_live(&self) -> bool {
        self.state == DocState::Live
    }

    /// Look up a field by dotted path (`owner.name`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }

    /// Render as a JSON object holding `_id` and the caller's fields.
    /// The soft-delete state is never rendered.
    pub fn to_json(&self) -> Value {
        let mut obj = self.data.clone();
        // The store identifier always wins over a stray `_id` in older rows
        obj.insert(
            STORE_ID_FIELD.to_string(),
            Value::String(self.store_id.clone()),
        );
        Value::Object(obj)
    }
}

pub fn lookup_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sort applied to reads. Ascending `order` is the canonical sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    ByOrder,
    /// Ascending `order`, then most recently inserted first.
    ByOrderNewestFirst,
}

/// Which identifier a soft-delete matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    /// The caller-supplied `id` field.
    Id,
    /// The store-assigned identifier (`_id`).
    StoreId,
}

impl FromStr for MatchField {
    type Err = CollectionDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id" => Ok(MatchField::Id),
            "_id" | "storeId" | "store_id" => Ok(MatchField::StoreId),
            other => Err(CollectionDbError::MalformedInput(format!(
                "attribute must be either '_id' or 'id', got '{other}'"
            ))),
        }
    }
}
