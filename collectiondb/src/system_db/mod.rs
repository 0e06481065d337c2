pub mod namespace;

use crate::error::{CollectionDbError, Result};
use crate::schema::CollectionType;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// The process-wide store handle: the collection-type registry table plus one
/// backing table per registered collection, all behind a single connection.
pub struct SystemDb {
    conn: Mutex<Connection>,
}

impl SystemDb {
    /// Open or create the database at the given path.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let db = SystemDb {
            conn: Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = SystemDb {
            conn: Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collection_types (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                collection_name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                schema_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Commits on `Ok`, rolls back
    /// on `Err`. Taking the write lock up front keeps other handles on the same
    /// file waiting on the busy timeout instead of failing mid-transaction.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ── Collection Types ────────────────────────────────────────────

    /// Persist a collection type, creating its backing namespace first in the
    /// same transaction so the type never becomes visible without storage.
    pub fn insert_collection_type(&self, record: &CollectionType) -> Result<()> {
        self.with_transaction(|conn| {
            if collection_type_row(conn, Lookup::CollectionName, &record.collection_name)?
                .is_some()
            {
                return Err(CollectionDbError::DuplicateCollection(
                    record.collection_name.clone(),
                ));
            }
            if collection_type_row(conn, Lookup::Id, &record.id)?.is_some() {
                return Err(CollectionDbError::DuplicateTypeId(record.id.clone()));
            }

            namespace::create(conn, &record.collection_name)?;

            let schema_json = serde_json::to_string(&record.schema)?;
            let inserted = conn.execute(
                "INSERT INTO collection_types
                    (id, name, collection_name, description, schema_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.name,
                    record.collection_name,
                    record.description,
                    schema_json,
                    format_timestamp(&record.created_at),
                    format_timestamp(&record.updated_at),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                // Another handle on the same file won the race
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(CollectionDbError::DuplicateCollection(
                        record.collection_name.clone(),
                    ))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_collection_type(
        &self,
        lookup: Lookup,
        value: &str,
    ) -> Result<Option<CollectionTypeRecord>> {
        self.with_conn(|conn| collection_type_row(conn, lookup, value))
    }

    pub fn list_collection_types(&self) -> Result<Vec<CollectionTypeRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM collection_types ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map([], CollectionTypeRecord::from_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    /// Update display metadata. Returns false when no record has `id`.
    pub fn update_collection_type(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        updated_at: &DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE collection_types
                 SET name = COALESCE(?2, name),
                     description = COALESCE(?3, description),
                     updated_at = ?4
                 WHERE id = ?1",
                params![id, name, description, format_timestamp(updated_at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Remove a registry record. Returns whether a record was removed.
    pub fn delete_collection_type(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM collection_types WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    pub fn namespace_exists(&self, collection: &str) -> Result<bool> {
        self.with_conn(|conn| namespace::exists(conn, collection))
    }
}

const COLUMNS: &str =
    "id, name, collection_name, description, schema_json, created_at, updated_at";

/// Column a registry lookup matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Id,
    CollectionName,
}

fn collection_type_row(
    conn: &Connection,
    lookup: Lookup,
    value: &str,
) -> Result<Option<CollectionTypeRecord>> {
    let column = match lookup {
        Lookup::Id => "id",
        Lookup::CollectionName => "collection_name",
    };
    let record = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM collection_types WHERE {column} = ?1"),
            params![value],
            CollectionTypeRecord::from_row,
        )
        .optional()?;
    Ok(record)
}

/// A row from the collection_types table
#[derive(Debug, Clone)]
pub struct CollectionTypeRecord {
    pub id: String,
    pub name: String,
    pub collection_name: String,
    pub description: String,
    pub schema_json: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CollectionTypeRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(CollectionTypeRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            collection_name: row.get(2)?,
            description: row.get(3)?,
            schema_json: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    /// Convert into the typed record. Unparseable schema text is kept as a
    /// JSON string so the record can still be listed and later shape-checked.
    pub fn into_collection_type(self) -> CollectionType {
        let schema = serde_json::from_str(&self.schema_json)
            .unwrap_or(serde_json::Value::String(self.schema_json));
        CollectionType {
            id: self.id,
            name: self.name,
            collection_name: self.collection_name,
            description: self.description,
            schema,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            log::warn!("Unreadable stored timestamp '{raw}': {e}");
            DateTime::<Utc>::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, collection_name: &str) -> CollectionType {
        let now = Utc::now();
        CollectionType {
            id: id.into(),
            name: id.to_uppercase(),
            collection_name: collection_name.into(),
            description: String::new(),
            schema: json!({ "type": "object" }),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_get_collection_type() {
        let db = SystemDb::open_in_memory().unwrap();
        db.insert_collection_type(&record("notes", "notes")).unwrap();

        let found = db
            .get_collection_type(Lookup::CollectionName, "notes")
            .unwrap()
            .unwrap()
            .into_collection_type();
        assert_eq!(found.id, "notes");
        assert_eq!(found.schema, json!({ "type": "object" }));
        assert!(db.namespace_exists("notes").unwrap());
        assert!(db.get_collection_type(Lookup::Id, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_collection_name() {
        let db = SystemDb::open_in_memory().unwrap();
        db.insert_collection_type(&record("a", "notes")).unwrap();
        let err = db.insert_collection_type(&record("b", "notes")).unwrap_err();
        assert!(matches!(err, CollectionDbError::DuplicateCollection(ref c) if c == "notes"));
    }

    #[test]
    fn test_duplicate_id_leaves_no_namespace() {
        let db = SystemDb::open_in_memory().unwrap();
        db.insert_collection_type(&record("a", "notes")).unwrap();
        let err = db.insert_collection_type(&record("a", "tasks")).unwrap_err();
        assert!(matches!(err, CollectionDbError::DuplicateTypeId(_)));
        assert!(!db.namespace_exists("tasks").unwrap());
    }

    #[test]
    fn test_update_and_delete() {
        let db = SystemDb::open_in_memory().unwrap();
        db.insert_collection_type(&record("notes", "notes")).unwrap();

        assert!(db
            .update_collection_type("notes", Some("Journal"), None, &Utc::now())
            .unwrap());
        let found = db.get_collection_type(Lookup::Id, "notes").unwrap().unwrap();
        assert_eq!(found.name, "Journal");
        assert_eq!(found.description, "");

        assert!(db.delete_collection_type("notes").unwrap());
        assert!(!db.delete_collection_type("notes").unwrap());
        assert!(db.list_collection_types().unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_schema_is_kept() {
        let db = SystemDb::open_in_memory().unwrap();
        db.insert_collection_type(&record("notes", "notes")).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE collection_types SET schema_json = 'not json' WHERE id = 'notes'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let found = db.list_collection_types().unwrap().remove(0).into_collection_type();
        assert_eq!(found.schema, json!("not json"));
    }

    #[test]
    fn test_transaction_rollback() {
        let db = SystemDb::open_in_memory().unwrap();
        let result: Result<()> = db.with_transaction(|conn| {
            namespace::create(conn, "scratch")?;
            Err(CollectionDbError::MalformedInput("abort".into()))
        });
        assert!(result.is_err());
        assert!(!db.namespace_exists("scratch").unwrap());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(&format_timestamp(&now)), now);
    }
}
