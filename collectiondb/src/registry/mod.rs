use crate::error::Result;
use crate::schema::{check_collection_type, CollectionType, CollectionTypeUpdate, NewCollectionType};
use crate::system_db::{Lookup, SystemDb};
use chrono::Utc;
use std::sync::Arc;

/// Collection type registry: the source of truth for which collections exist
/// and what shape their documents must have.
pub struct Registry {
    db: Arc<SystemDb>,
}

impl Registry {
    pub fn new(db: Arc<SystemDb>) -> Self {
        Registry { db }
    }

    /// Register a new collection type. The type is shape-checked before any
    /// storage is touched, and its backing namespace exists before the record
    /// becomes visible.
    pub fn create(&self, new_type: NewCollectionType) -> Result<CollectionType> {
        check_collection_type(&new_type)?;

        let now = Utc::now();
        let record = CollectionType {
            id: new_type.id,
            name: new_type.name,
            collection_name: new_type.collection_name,
            description: new_type.description,
            schema: new_type.schema,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_collection_type(&record)?;

        log::info!(
            "Registered collection type '{}' backed by '{}'",
            record.id,
            record.collection_name
        );
        Ok(record)
    }

    pub fn get_by_name(&self, collection_name: &str) -> Result<Option<CollectionType>> {
        self.get(Lookup::CollectionName, collection_name)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<CollectionType>> {
        self.get(Lookup::Id, id)
    }

    pub fn exists(&self, collection_name: &str) -> Result<bool> {
        Ok(self.get_by_name(collection_name)?.is_some())
    }

    /// All registered types, oldest first. Records whose schema no longer
    /// passes the shape check are logged and returned unchanged.
    pub fn list_all(&self) -> Result<Vec<CollectionType>> {
        Ok(self
            .db
            .list_collection_types()?
            .into_iter()
            .map(|record| lenient(record.into_collection_type()))
            .collect())
    }

    /// Update display metadata, refreshing `updated_at`.
    pub fn update(&self, id: &str, update: CollectionTypeUpdate) -> Result<Option<CollectionType>> {
        let changed = self.db.update_collection_type(
            id,
            update.name.as_deref(),
            update.description.as_deref(),
            &Utc::now(),
        )?;
        if !changed {
            return Ok(None);
        }
        self.get_by_id(id)
    }

    /// Remove a registry record. Idempotent; the backing namespace is left alone.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.db.delete_collection_type(id)?;
        if removed {
            log::info!("Removed collection type '{id}' from registry");
        }
        Ok(removed)
    }

    fn get(&self, lookup: Lookup, value: &str) -> Result<Option<CollectionType>> {
        Ok(self
            .db
            .get_collection_type(lookup, value)?
            .map(|record| lenient(record.into_collection_type())))
    }
}

fn lenient(record: CollectionType) -> CollectionType {
    if let Err(e) = record.document_schema() {
        log::warn!(
            "Collection type '{}' has an invalid schema and is returned as-is: {e}",
            record.id
        );
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectionDbError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new(Arc::new(SystemDb::open_in_memory().unwrap()))
    }

    fn new_type(id: &str, collection_name: &str) -> NewCollectionType {
        NewCollectionType {
            id: id.into(),
            name: "Recipes".into(),
            collection_name: collection_name.into(),
            description: "Things to cook".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "order": { "type": "number" },
                    "servings": { "type": "number" }
                },
                "required": ["summary", "order"]
            }),
        }
    }

    #[test]
    fn test_create_sets_timestamps() {
        let registry = registry();
        let created = registry.create(new_type("recipes", "recipes")).unwrap();
        assert_eq!(created.created_at, created.updated_at);

        let by_name = registry.get_by_name("recipes").unwrap().unwrap();
        assert_eq!(by_name, created);
        let by_id = registry.get_by_id("recipes").unwrap().unwrap();
        assert_eq!(by_id.collection_name, "recipes");
    }

    #[test]
    fn test_missing_records_are_none() {
        let registry = registry();
        assert!(registry.get_by_name("nope").unwrap().is_none());
        assert!(registry.get_by_id("nope").unwrap().is_none());
        assert!(!registry.exists("nope").unwrap());
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let registry = registry();
        registry.create(new_type("recipes", "recipes")).unwrap();
        let err = registry.create(new_type("recipes-2", "recipes")).unwrap_err();
        assert!(matches!(err, CollectionDbError::DuplicateCollection(_)));
        assert_eq!(registry.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_summary_less_schema_never_touches_storage() {
        let db = Arc::new(SystemDb::open_in_memory().unwrap());
        let registry = Registry::new(db.clone());
        let mut bad = new_type("recipes", "recipes");
        bad.schema = json!({
            "type": "object",
            "properties": { "order": { "type": "number" } },
            "required": ["order"]
        });

        let err = registry.create(bad).unwrap_err();
        assert!(matches!(err, CollectionDbError::SchemaMissingSummary(_)));
        assert!(!db.namespace_exists("recipes").unwrap());
        assert!(registry.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_list_all_is_lenient() {
        let db = Arc::new(SystemDb::open_in_memory().unwrap());
        let registry = Registry::new(db.clone());
        registry.create(new_type("recipes", "recipes")).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE collection_types SET schema_json = '{\"type\":\"array\"}'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let all = registry.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].schema, json!({ "type": "array" }));
        assert!(all[0].document_schema().is_err());
    }

    #[test]
    fn test_update_metadata() {
        let registry = registry();
        let created = registry.create(new_type("recipes", "recipes")).unwrap();

        let updated = registry
            .update(
                "recipes",
                CollectionTypeUpdate {
                    description: Some("Family recipes".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.description, "Family recipes");
        assert_eq!(updated.name, "Recipes");
        assert!(updated.updated_at >= created.updated_at);

        assert!(registry
            .update("missing", CollectionTypeUpdate::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let registry = registry();
        registry.create(new_type("recipes", "recipes")).unwrap();
        assert!(registry.delete("recipes").unwrap());
        assert!(!registry.delete("recipes").unwrap());
        assert!(registry.get_by_id("recipes").unwrap().is_none());
    }
}
