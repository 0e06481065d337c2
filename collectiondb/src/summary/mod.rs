// Summary projection and collection discovery

use crate::document::Sort;
use crate::error::{CollectionDbError, Result};
use crate::registry::Registry;
use crate::schema::CollectionType;
use crate::store::{Collection, Filter};
use crate::system_db::SystemDb;
use serde::Serialize;
use serde_json::Value;

const SUMMARY_FIELD: &str = "summary";
/// Most collections returned by discovery.
pub const DISCOVERY_LIMIT: usize = 20;

/// One live document reduced to its identifier and summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryEntry {
    pub id: String,
    pub summary: String,
}

/// Project every live document to `{id, summary}`, ascending by order.
pub fn summarize(collection: &Collection<'_>) -> Result<Vec<SummaryEntry>> {
    if !collection.collection_type().requires(SUMMARY_FIELD) {
        return Err(CollectionDbError::SchemaMissingSummary(
            collection.name().to_string(),
        ));
    }

    let docs = collection.find_live(&Filter::All, Some(Sort::ByOrder), None)?;
    Ok(docs
        .into_iter()
        .map(|doc| {
            let summary = match doc.data.get(SUMMARY_FIELD) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            SummaryEntry {
                id: doc.store_id,
                summary,
            }
        })
        .collect())
}

pub fn format_summary(collection: &str, entries: &[SummaryEntry]) -> String {
    if entries.is_empty() {
        return format!("Collection '{collection}' is empty.");
    }

    let mut out = format!(
        "Collection '{collection}' contains {} records:",
        entries.len()
    );
    for entry in entries {
        out.push_str(&format!("\n[{}]: {}", entry.id, entry.summary));
    }
    out
}

/// Registered collections whose backing namespace still exists, newest first.
/// Entries whose namespace has disappeared are removed from the registry.
pub fn discover_collections(registry: &Registry, db: &SystemDb) -> Result<Vec<CollectionType>> {
    let mut live = Vec::new();
    for collection_type in registry.list_all()? {
        if db.namespace_exists(&collection_type.collection_name)? {
            live.push(collection_type);
            continue;
        }

        log::info!(
            "Pruning collection type '{}': backing store '{}' no longer exists",
            collection_type.id,
            collection_type.collection_name
        );
        registry.delete(&collection_type.id)?;
    }

    live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    live.truncate(DISCOVERY_LIMIT);
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_summary() {
        let entries = vec![
            SummaryEntry {
                id: "01A".into(),
                summary: "First".into(),
            },
            SummaryEntry {
                id: "01B".into(),
                summary: "Second".into(),
            },
        ];
        assert_eq!(
            format_summary("notes", &entries),
            "Collection 'notes' contains 2 records:\n[01A]: First\n[01B]: Second"
        );
    }

    #[test]
    fn test_format_empty_summary() {
        assert_eq!(format_summary("notes", &[]), "Collection 'notes' is empty.");
    }
}
