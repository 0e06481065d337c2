pub mod parser;
pub mod types;

pub use parser::{check_collection_type, check_schema, parse_schema_node, parse_schema_str};
pub use types::{
    CollectionType, CollectionTypeUpdate, NewCollectionType, ObjectSchema, Property, SchemaNode,
};
