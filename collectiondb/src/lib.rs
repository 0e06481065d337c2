pub mod config;
pub mod schema;
pub mod document;
pub mod system_db;
pub mod registry;
pub mod sequencer;
pub mod store;
pub mod query;
pub mod summary;
pub mod validation;
pub mod input;
pub mod error;

pub use config::{Config, ValidationMode};
pub use error::{CollectionDbError, Result};
pub use schema::{CollectionType, CollectionTypeUpdate, NewCollectionType};
pub use store::{Collection, Filter, InsertOutcome, Store};
pub use document::{Document, MatchField, Sort};
pub use query::{LimitPolicy, QueryOutcome, QueryRequest, QueryType};
pub use summary::SummaryEntry;
