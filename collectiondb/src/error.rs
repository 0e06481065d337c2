use crate::validation::Violation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectionDbError {
    #[error("Collection '{0}' is already registered")]
    DuplicateCollection(String),

    #[error("Collection type id '{0}' is already registered")]
    DuplicateTypeId(String),

    #[error("Collection '{0}' does not exist in registry")]
    UnknownCollection(String),

    #[error("Document does not match schema of '{collection}': {}", join_violations(.violations))]
    SchemaViolation {
        collection: String,
        violations: Vec<Violation>,
    },

    #[error("Collection '{0}' schema must include a required 'summary' property of type string")]
    SchemaMissingSummary(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Document for collection '{0}' must include an integer 'order' field")]
    MissingOrder(String),

    #[error("Order mismatch in collection '{collection}': expected {expected}, got {submitted}")]
    OrderMismatch {
        collection: String,
        expected: i64,
        submitted: i64,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid query type: {0}")]
    InvalidQueryType(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Document at index {index} was rejected: {source}")]
    BatchRejected {
        index: usize,
        #[source]
        source: Box<CollectionDbError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CollectionDbError {
    /// Stable snake_case name of the error kind, for structured failure payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectionDbError::DuplicateCollection(_) => "duplicate_collection",
            CollectionDbError::DuplicateTypeId(_) => "duplicate_type_id",
            CollectionDbError::UnknownCollection(_) => "unknown_collection",
            CollectionDbError::SchemaViolation { .. } => "schema_violation",
            CollectionDbError::SchemaMissingSummary(_) => "schema_missing_summary",
            CollectionDbError::InvalidSchema(_) => "invalid_schema",
            CollectionDbError::MissingOrder(_) => "missing_order",
            CollectionDbError::OrderMismatch { .. } => "order_mismatch",
            CollectionDbError::InvalidIdentifier(_) => "invalid_identifier",
            CollectionDbError::InvalidQueryType(_) => "invalid_query_type",
            CollectionDbError::MalformedInput(_) => "malformed_input",
            CollectionDbError::BatchRejected { .. } => "batch_rejected",
            CollectionDbError::Config(_) => "config",
            CollectionDbError::Json(_) => "json",
            CollectionDbError::Sqlite(_) => "store",
        }
    }

    /// Wrap this error with the index of the batch document that caused it.
    pub fn at_index(self, index: usize) -> Self {
        CollectionDbError::BatchRejected {
            index,
            source: Box::new(self),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, CollectionDbError>;
