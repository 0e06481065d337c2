use crate::config::{Config, ValidationMode};
use crate::document::{Document, MatchField, Sort, DELETED_FIELD, ORDER_FIELD, STORE_ID_FIELD};
use crate::error::{CollectionDbError, Result};
use crate::query::{self, QueryOutcome, QueryRequest};
use crate::registry::Registry;
use crate::schema::{CollectionType, CollectionTypeUpdate, NewCollectionType};
use crate::sequencer::OrderSequencer;
use crate::summary::{self, SummaryEntry};
use crate::system_db::namespace::{self, NewRow, RowScope, RowTarget, WriteOutcome};
use crate::system_db::SystemDb;
use crate::validation::{self, is_integral, Violation};
use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use ulid::Ulid;

/// The main entry point for collectiondb.
/// Owns the store connection, the collection type registry and the order
/// sequencer, and hands out collection handles for document operations.
pub struct Store {
    db: Arc<SystemDb>,
    registry: Registry,
    sequencer: OrderSequencer,
    ids: Mutex<ulid::Generator>,
    config: Config,
}

impl Store {
    /// Open (or create) the database named by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let db = SystemDb::open(&config.database_path, config.busy_timeout)?;
        log::info!("Opened collection store at {}", config.database_path.display());
        Ok(Self::with_db(db, config))
    }

    /// Open a store backed by an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_db(SystemDb::open_in_memory()?, Config::default()))
    }

    fn with_db(db: SystemDb, config: Config) -> Self {
        let db = Arc::new(db);
        Store {
            registry: Registry::new(db.clone()),
            db,
            sequencer: OrderSequencer::new(),
            ids: Mutex::new(ulid::Generator::new()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get a handle on a registered collection. The backing namespace is
    /// created if it does not exist yet.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        let collection_type = self
            .registry
            .get_by_name(name)?
            .ok_or_else(|| CollectionDbError::UnknownCollection(name.to_string()))?;
        self.db.with_conn(|conn| {
            let collection = &collection_type.collection_name;
            if !namespace::exists(conn, collection)? {
                log::warn!("Backing store for collection '{collection}' is missing; recreating it");
            }
            namespace::create(conn, collection)
        })?;
        Ok(Collection {
            store: self,
            collection_type,
        })
    }

    // ── Collection Types ────────────────────────────────────────────

    pub fn register_type(&self, new_type: NewCollectionType) -> Result<CollectionType> {
        self.registry.create(new_type)
    }

    pub fn get_type(&self, id: &str) -> Result<Option<CollectionType>> {
        self.registry.get_by_id(id)
    }

    pub fn list_types(&self) -> Result<Vec<CollectionType>> {
        self.registry.list_all()
    }

    pub fn update_type(
        &self,
        id: &str,
        update: CollectionTypeUpdate,
    ) -> Result<Option<CollectionType>> {
        self.registry.update(id, update)
    }

    /// Remove a type from the registry. Its documents stay in the store.
    pub fn unregister_type(&self, id: &str) -> Result<bool> {
        let removed = self.registry.get_by_id(id)?;
        let deleted = self.registry.delete(id)?;
        if let Some(collection_type) = removed {
            self.sequencer.invalidate(&collection_type.collection_name);
        }
        Ok(deleted)
    }

    // ── Reads over registered collections ──────────────────────────

    pub fn query(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        query::run(&self.collection(&request.collection)?, request)
    }

    pub fn summarize(&self, collection: &str) -> Result<Vec<SummaryEntry>> {
        summary::summarize(&self.collection(collection)?)
    }

    /// The rendered summary block for a collection.
    pub fn formatted_summary(&self, collection: &str) -> Result<String> {
        let entries = self.summarize(collection)?;
        Ok(summary::format_summary(collection, &entries))
    }

    pub fn discover_collections(&self) -> Result<Vec<CollectionType>> {
        summary::discover_collections(&self.registry, &self.db)
    }

    fn next_store_id(&self) -> String {
        let mut ids = self.ids.lock();
        match ids.generate() {
            Ok(id) => id.to_string(),
            // Only reachable when the random part overflows within one millisecond
            Err(_) => Ulid::new().to_string(),
        }
    }

    /// Accept `order` for `collection`, re-checking against the store once
    /// when the cache disagrees.
    fn claim_order(&self, conn: &Connection, collection: &str, order: i64) -> Result<()> {
        match self.sequencer.accept(conn, collection, order) {
            Err(CollectionDbError::OrderMismatch { .. }) => {
                self.sequencer.invalidate(collection);
                self.sequencer.accept(conn, collection, order)
            }
            other => other,
        }
    }
}

/// What a successful insert reports back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOutcome {
    pub store_id: String,
    pub order: i64,
    /// Violations accepted because validation is off.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Violation>,
    /// Some string field is long and not formatted as Markdown.
    pub large_text: bool,
}

/// Caller filter applied on top of the live-document predicate.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    /// The field equals `value`, or is an array containing it.
    Equals { path: String, value: Value },
    /// The field is a string, or an array holding a string, matching `pattern`.
    Matches { path: String, pattern: Regex },
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals { path, value } => match doc.get(path) {
                Some(field) if field == value => true,
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Filter::Matches { path, pattern } => match doc.get(path) {
                Some(Value::String(s)) => pattern.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| pattern.is_match(s)),
                _ => false,
            },
        }
    }
}

/// A document prepared for writing: validated, order extracted.
struct PendingInsert {
    data: Map<String, Value>,
    order: i64,
    warnings: Vec<Violation>,
    large_text: bool,
}

impl PendingInsert {
    fn into_outcome(self, store_id: String) -> InsertOutcome {
        InsertOutcome {
            store_id,
            order: self.order,
            warnings: self.warnings,
            large_text: self.large_text,
        }
    }
}

/// A handle to a registered collection within a store.
pub struct Collection<'a> {
    store: &'a Store,
    collection_type: CollectionType,
}

impl<'a> Collection<'a> {
    pub fn name(&self) -> &str {
        &self.collection_type.collection_name
    }

    pub fn collection_type(&self) -> &CollectionType {
        &self.collection_type
    }

    /// The order the next insert must carry.
    pub fn next_expected_order(&self) -> Result<i64> {
        self.store
            .db
            .with_conn(|conn| self.store.sequencer.next_expected(conn, self.name()))
    }

    /// Validate and insert one document.
    pub fn insert(&self, data: Value, mode: ValidationMode) -> Result<InsertOutcome> {
        let pending = self.prepare(data, mode)?;
        let store_id = self.transact(|conn| self.write_one(conn, &pending))?;

        log::info!(
            "Inserted document {store_id} into '{}' at order {}",
            self.name(),
            pending.order
        );
        Ok(pending.into_outcome(store_id))
    }

    /// Validate every document, then insert them all in one transaction.
    /// The first failing document aborts the batch and is reported by index.
    pub fn insert_batch(&self, docs: Vec<Value>, mode: ValidationMode) -> Result<Vec<InsertOutcome>> {
        if docs.is_empty() {
            return Err(CollectionDbError::MalformedInput(
                "batch must contain at least one document".into(),
            ));
        }

        let pending = docs
            .into_iter()
            .enumerate()
            .map(|(index, data)| self.prepare(data, mode).map_err(|e| e.at_index(index)))
            .collect::<Result<Vec<_>>>()?;

        let ids = self.transact(|conn| {
            pending
                .iter()
                .enumerate()
                .map(|(index, doc)| self.write_one(conn, doc).map_err(|e| e.at_index(index)))
                .collect::<Result<Vec<_>>>()
        })?;

        log::info!(
            "Inserted {} documents into '{}'",
            ids.len(),
            self.name()
        );
        Ok(pending
            .into_iter()
            .zip(ids)
            .map(|(doc, store_id)| doc.into_outcome(store_id))
            .collect())
    }

    /// Flag every live document matching `value` as deleted. Returns the count.
    pub fn soft_delete(&self, field: MatchField, value: &str) -> Result<usize> {
        let store_id;
        let target = match field {
            MatchField::Id => RowTarget::CallerId(value),
            MatchField::StoreId => {
                store_id = Ulid::from_string(value)
                    .map_err(|e| {
                        CollectionDbError::InvalidIdentifier(format!("'{value}' is not a ULID: {e}"))
                    })?
                    .to_string();
                RowTarget::StoreId(&store_id)
            }
        };

        let count = self
            .store
            .db
            .with_conn(|conn| namespace::mark_deleted(conn, self.name(), target))?;
        log::info!("Soft-deleted {count} document(s) from '{}'", self.name());
        Ok(count)
    }

    /// Live documents matching `filter`, sorted and limited.
    /// Only `Filter::All` is answered in SQL; other filters scan every live
    /// row and apply the limit after matching.
    pub fn find_live(
        &self,
        filter: &Filter,
        sort: Option<Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        if let Filter::All = filter {
            return self.store.db.with_conn(|conn| {
                namespace::select_rows(conn, self.name(), RowScope::Live, sort, limit)
            });
        }

        let rows = self.store.db.with_conn(|conn| {
            namespace::select_rows(conn, self.name(), RowScope::Live, sort, None)
        })?;
        let matching = rows.into_iter().filter(|doc| filter.matches(doc));
        Ok(match limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    /// Number of live documents matching `filter`.
    pub fn count(&self, filter: &Filter) -> Result<usize> {
        match filter {
            Filter::All => self
                .store
                .db
                .with_conn(|conn| namespace::count_rows(conn, self.name(), RowScope::Live)),
            _ => Ok(self.find_live(filter, None, None)?.len()),
        }
    }

    /// Every live document in order, without a limit.
    pub fn export(&self) -> Result<Vec<Document>> {
        self.find_live(&Filter::All, Some(Sort::ByOrder), None)
    }

    fn prepare(&self, data: Value, mode: ValidationMode) -> Result<PendingInsert> {
        let Value::Object(mut data) = data else {
            return Err(CollectionDbError::MalformedInput(format!(
                "document for '{}' must be a JSON object",
                self.name()
            )));
        };
        data.remove(DELETED_FIELD);
        data.remove(STORE_ID_FIELD);

        let schema = self.collection_type.document_schema()?;
        let result = validation::validate_fields(&schema, &data);
        let warnings = validation::enforce(mode, self.name(), result)?;

        let order = match data.get(ORDER_FIELD) {
            Some(value) if is_integral(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .ok_or_else(|| CollectionDbError::MissingOrder(self.name().to_string()))?,
            _ => return Err(CollectionDbError::MissingOrder(self.name().to_string())),
        };
        // `1.0` is stored as `1` so exact matches on `order` agree with the column
        data.insert(ORDER_FIELD.to_string(), Value::from(order));

        let large_text = has_large_text(&data, self.store.config.large_text_threshold);
        Ok(PendingInsert {
            data,
            order,
            warnings,
            large_text,
        })
    }

    /// Run a write transaction. Any failure leaves the cached order unknown,
    /// so it is dropped and recomputed from the store on the next insert.
    fn transact<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.store.db.with_transaction(f).map_err(|e| {
            self.store.sequencer.invalidate(self.name());
            e
        })
    }

    fn write_one(&self, conn: &Connection, doc: &PendingInsert) -> Result<String> {
        let collection = self.name();
        self.store.claim_order(conn, collection, doc.order)?;

        let store_id = self.store.next_store_id();
        let row = NewRow {
            store_id: &store_id,
            order: doc.order,
            data: &doc.data,
            created_at: Utc::now(),
        };
        match namespace::insert_row(conn, collection, &row)? {
            WriteOutcome::Inserted => Ok(store_id),
            WriteOutcome::OrderConflict => Err(CollectionDbError::OrderMismatch {
                collection: collection.to_string(),
                expected: namespace::max_order(conn, collection)? + 1,
                submitted: doc.order,
            }),
        }
    }
}

/// Whether any string field (at any depth) is longer than `threshold`
/// characters and does not already start as Markdown.
fn has_large_text(data: &Map<String, Value>, threshold: usize) -> bool {
    fn visit(value: &Value, threshold: usize) -> bool {
        match value {
            Value::String(s) => !s.trim_start().starts_with('#') && s.chars().count() > threshold,
            Value::Array(items) => items.iter().any(|v| visit(v, threshold)),
            Value::Object(map) => map.values().any(|v| visit(v, threshold)),
            _ => false,
        }
    }
    data.values().any(|v| visit(v, threshold))
}
