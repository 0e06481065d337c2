// Per-collection backing tables: `coll_<collection_name>`

use super::{format_timestamp, parse_timestamp};
use crate::document::{DocState, Document, Sort};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde_json::{Map, Value};

const TABLE_PREFIX: &str = "coll_";

/// Which rows a read sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowScope {
    /// Rows whose soft-delete flag is clear. Every public read uses this.
    Live,
    /// Every stored row, soft-deleted ones included.
    All,
}

/// Row selector for soft-delete.
#[derive(Debug, Clone, Copy)]
pub enum RowTarget<'a> {
    StoreId(&'a str),
    CallerId(&'a str),
}

/// A row about to be written.
pub struct NewRow<'a> {
    pub store_id: &'a str,
    pub order: i64,
    pub data: &'a Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// The submitted order was not `MAX(ord) + 1`, or was already taken.
    OrderConflict,
}

pub fn table_name(collection: &str) -> String {
    format!("{TABLE_PREFIX}{collection}")
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Create the backing table and its indexes. Idempotent.
pub fn create(conn: &Connection, collection: &str) -> Result<()> {
    let table = table_name(collection);
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {t} (
            store_id TEXT PRIMARY KEY,
            ord INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS {deleted_idx} ON {t}(deleted);
        CREATE UNIQUE INDEX IF NOT EXISTS {order_idx} ON {t}(ord);
        ",
        t = quote(&table),
        deleted_idx = quote(&format!("idx_{table}_deleted")),
        order_idx = quote(&format!("uq_{table}_order")),
    ))?;
    Ok(())
}

/// A namespace exists when at least one index is attached to its table.
pub fn exists(conn: &Connection, collection: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1",
        params![table_name(collection)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Highest stored order, soft-deleted rows included; 0 when empty.
pub fn max_order(conn: &Connection, collection: &str) -> Result<i64> {
    let max = conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(ord), 0) FROM {}",
            quote(&table_name(collection))
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(max)
}

/// Insert a row only if its order is exactly `MAX(ord) + 1`. The check and the
/// write are one statement, and the unique index on `ord` backs it up when
/// several handles share the file.
pub fn insert_row(conn: &Connection, collection: &str, row: &NewRow<'_>) -> Result<WriteOutcome> {
    let t = quote(&table_name(collection));
    let data_json = serde_json::to_string(row.data)?;
    let sql = format!(
        "INSERT INTO {t} (store_id, ord, deleted, data, created_at)
         SELECT ?1, ?2, 0, ?3, ?4
         WHERE (SELECT COALESCE(MAX(ord), 0) FROM {t}) + 1 = ?2"
    );

    match conn.execute(
        &sql,
        params![
            row.store_id,
            row.order,
            data_json,
            format_timestamp(&row.created_at)
        ],
    ) {
        Ok(0) => Ok(WriteOutcome::OrderConflict),
        Ok(_) => Ok(WriteOutcome::Inserted),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Ok(WriteOutcome::OrderConflict)
        }
        Err(e) => Err(e.into()),
    }
}

/// Set the soft-delete flag on every live row matching `target`.
/// Returns the number of rows flagged.
pub fn mark_deleted(conn: &Connection, collection: &str, target: RowTarget<'_>) -> Result<usize> {
    let t = quote(&table_name(collection));
    let flag = DocState::Deleted.as_flag();
    let changed = match target {
        RowTarget::StoreId(store_id) => conn.execute(
            &format!("UPDATE {t} SET deleted = ?1 WHERE store_id = ?2 AND deleted = 0"),
            params![flag, store_id],
        )?,
        RowTarget::CallerId(id) => conn.execute(
            &format!(
                "UPDATE {t} SET deleted = ?1 WHERE json_extract(data, '$.id') = ?2 AND deleted = 0"
            ),
            params![flag, id],
        )?,
    };
    Ok(changed)
}

/// Read rows in the requested scope, sorted and limited in SQL.
pub fn select_rows(
    conn: &Connection,
    collection: &str,
    scope: RowScope,
    sort: Option<Sort>,
    limit: Option<usize>,
) -> Result<Vec<Document>> {
    let mut sql = format!(
        "SELECT store_id, ord, deleted, data, created_at FROM {}",
        quote(&table_name(collection))
    );
    if scope == RowScope::Live {
        sql.push_str(" WHERE deleted = 0");
    }
    match sort {
        Some(Sort::ByOrder) => sql.push_str(" ORDER BY ord ASC"),
        Some(Sort::ByOrderNewestFirst) => sql.push_str(" ORDER BY ord ASC, store_id DESC"),
        None => sql.push_str(" ORDER BY rowid ASC"),
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(RawRow {
            store_id: row.get(0)?,
            ord: row.get(1)?,
            deleted: row.get(2)?,
            data: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(row?.into_document()?);
    }
    Ok(docs)
}

pub fn count_rows(conn: &Connection, collection: &str, scope: RowScope) -> Result<usize> {
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote(&table_name(collection)));
    if scope == RowScope::Live {
        sql.push_str(" WHERE deleted = 0");
    }
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as usize)
}

struct RawRow {
    store_id: String,
    ord: i64,
    deleted: i64,
    data: String,
    created_at: String,
}

impl RawRow {
    fn into_document(self) -> Result<Document> {
        let data: Map<String, Value> = serde_json::from_str(&self.data)?;
        Ok(Document {
            store_id: self.store_id,
            order: self.ord,
            state: DocState::from_flag(self.deleted),
            created_at: parse_timestamp(&self.created_at),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conn_with(collection: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create(&conn, collection).unwrap();
        conn
    }

    fn write(conn: &Connection, store_id: &str, order: i64, data: Value) -> WriteOutcome {
        let data = data.as_object().cloned().unwrap();
        insert_row(
            conn,
            "notes",
            &NewRow {
                store_id,
                order,
                data: &data,
                created_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_is_idempotent_and_indexed() {
        let conn = conn_with("notes");
        create(&conn, "notes").unwrap();
        assert!(exists(&conn, "notes").unwrap());
        assert!(!exists(&conn, "other").unwrap());
    }

    #[test]
    fn test_insert_requires_next_order() {
        let conn = conn_with("notes");
        assert_eq!(max_order(&conn, "notes").unwrap(), 0);
        assert_eq!(write(&conn, "a", 2, json!({})), WriteOutcome::OrderConflict);
        assert_eq!(write(&conn, "a", 1, json!({})), WriteOutcome::Inserted);
        assert_eq!(write(&conn, "b", 1, json!({})), WriteOutcome::OrderConflict);
        assert_eq!(write(&conn, "b", 2, json!({})), WriteOutcome::Inserted);
        assert_eq!(max_order(&conn, "notes").unwrap(), 2);
    }

    #[test]
    fn test_mark_deleted_by_caller_id() {
        let conn = conn_with("notes");
        write(&conn, "a", 1, json!({ "id": "n-1" }));
        write(&conn, "b", 2, json!({ "id": "n-2" }));

        assert_eq!(mark_deleted(&conn, "notes", RowTarget::CallerId("n-1")).unwrap(), 1);
        // Already deleted rows are not counted twice
        assert_eq!(mark_deleted(&conn, "notes", RowTarget::CallerId("n-1")).unwrap(), 0);

        assert_eq!(count_rows(&conn, "notes", RowScope::Live).unwrap(), 1);
        assert_eq!(count_rows(&conn, "notes", RowScope::All).unwrap(), 2);

        let all = select_rows(&conn, "notes", RowScope::All, Some(Sort::ByOrder), None).unwrap();
        assert_eq!(all[0].state, DocState::Deleted);
        assert_eq!(all[1].state, DocState::Live);
    }

    #[test]
    fn test_deleted_rows_keep_their_order() {
        let conn = conn_with("notes");
        write(&conn, "a", 1, json!({}));
        mark_deleted(&conn, "notes", RowTarget::StoreId("a")).unwrap();
        assert_eq!(max_order(&conn, "notes").unwrap(), 1);
        assert_eq!(write(&conn, "b", 1, json!({})), WriteOutcome::OrderConflict);
    }

    #[test]
    fn test_select_sort_and_limit() {
        let conn = conn_with("notes");
        for (id, order) in [("a", 1), ("b", 2), ("c", 3)] {
            write(&conn, id, order, json!({ "n": order }));
        }
        let rows =
            select_rows(&conn, "notes", RowScope::Live, Some(Sort::ByOrder), Some(2)).unwrap();
        let orders: Vec<i64> = rows.iter().map(|d| d.order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(rows[1].data["n"], json!(2));
    }

    #[test]
    fn test_quoted_names() {
        let conn = conn_with("my-notes");
        assert!(exists(&conn, "my-notes").unwrap());
        assert_eq!(count_rows(&conn, "my-notes", RowScope::All).unwrap(), 0);
    }
}
