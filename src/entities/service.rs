// Entity Canonicalization Service
//
// Maps raw counterparty spellings to one canonical name per user and type.
// An unmapped name resolves to itself.

use super::mapping::{clean_names, normalize_name, EntityMapping, EntityType};
use super::store::MappingStore;
use crate::error::{IngestError, Result};
use chrono::Utc;
use std::collections::HashMap;

pub struct CanonicalizationService<S: MappingStore> {
    store: S,
}

impl<S: MappingStore> CanonicalizationService<S> {
    pub fn new(store: S) -> Self {
        CanonicalizationService { store }
    }

    /// Resolve every name with one store query per entity type.
    ///
    /// When more than one requested type maps a name, the earlier type in
    /// `entity_types` wins. An empty `entity_types` means all types. If the
    /// store cannot be read, every name resolves to itself.
    pub fn resolve_batch(
        &self,
        user_id: &str,
        names: &[String],
        entity_types: &[EntityType],
    ) -> HashMap<String, String> {
        let requested: Vec<EntityType> = if entity_types.is_empty() {
            EntityType::all().to_vec()
        } else {
            let mut unique = Vec::new();
            for t in entity_types {
                if !unique.contains(t) {
                    unique.push(*t);
                }
            }
            unique
        };

        let mut resolved: HashMap<String, String> = HashMap::with_capacity(names.len());
        for entity_type in requested {
            let lookup: HashMap<String, String> = match self.store.mapped_names(user_id, entity_type) {
                Ok(pairs) => pairs.into_iter().collect(),
                Err(e) => {
                    let degraded = IngestError::CanonicalizationUnavailable(e.to_string());
                    tracing::warn!(user_id, entity_type = entity_type.as_str(), error = %degraded, "using raw names");
                    continue;
                }
            };
            for name in names {
                if resolved.contains_key(name) {
                    continue;
                }
                if let Some(canonical) = lookup.get(&normalize_name(name)) {
                    resolved.insert(name.clone(), canonical.clone());
                }
            }
        }

        for name in names {
            resolved.entry(name.clone()).or_insert_with(|| name.clone());
        }
        resolved
    }

    pub fn create_mapping(
        &self,
        user_id: &str,
        canonical_name: &str,
        mapped_names: &[String],
        entity_type: EntityType,
    ) -> Result<EntityMapping> {
        validate_canonical(canonical_name)?;
        let names = validate_names(mapped_names)?;

        let mapping = EntityMapping::new(user_id, entity_type, canonical_name, names);
        self.store.insert(&mapping)?;
        tracing::info!(user_id, id = %mapping.id, canonical = %mapping.canonical_name, names = mapping.mapped_names.len(), "entity mapping created");
        Ok(mapping)
    }

    /// Change canonical name and/or mapped names. Uniqueness is checked
    /// against every other mapping before anything is written.
    pub fn update_mapping(
        &self,
        user_id: &str,
        id: &str,
        canonical_name: Option<&str>,
        mapped_names: Option<&[String]>,
    ) -> Result<EntityMapping> {
        let mut mapping = self
            .store
            .get(user_id, id)?
            .ok_or_else(|| IngestError::NotFound(format!("entity mapping {}", id)))?;

        if let Some(canonical_name) = canonical_name {
            validate_canonical(canonical_name)?;
            mapping.canonical_name = canonical_name.trim().to_string();
        }
        if let Some(names) = mapped_names {
            mapping.mapped_names = validate_names(names)?;
        }
        mapping.updated_at = Utc::now();

        self.store.replace(&mapping)?;
        tracing::info!(user_id, id, "entity mapping updated");
        Ok(mapping)
    }

    /// Names of a deleted mapping revert to identity
    pub fn delete_mapping(&self, user_id: &str, id: &str) -> Result<()> {
        if self.store.delete(user_id, id)? {
            tracing::info!(user_id, id, "entity mapping deleted");
            Ok(())
        } else {
            Err(IngestError::NotFound(format!("entity mapping {}", id)))
        }
    }

    pub fn list_mappings(&self, user_id: &str, entity_type: Option<EntityType>) -> Result<Vec<EntityMapping>> {
        self.store.list(user_id, entity_type)
    }
}

fn validate_canonical(canonical_name: &str) -> Result<()> {
    if canonical_name.trim().is_empty() {
        return Err(IngestError::Validation("canonical name must not be blank".to_string()));
    }
    Ok(())
}

fn validate_names(names: &[String]) -> Result<Vec<String>> {
    let cleaned = clean_names(names).map_err(IngestError::Validation)?;
    if cleaned.is_empty() {
        return Err(IngestError::Validation("at least one mapped name is required".to_string()));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::SqliteMappingStore;
    use rusqlite::Connection;
    use std::cell::Cell;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    /// Counts mapped_names round trips
    struct CountingStore<'c> {
        inner: SqliteMappingStore<'c>,
        queries: Cell<usize>,
    }

    impl MappingStore for CountingStore<'_> {
        fn mapped_names(&self, user_id: &str, entity_type: EntityType) -> Result<Vec<(String, String)>> {
            self.queries.set(self.queries.get() + 1);
            self.inner.mapped_names(user_id, entity_type)
        }
        fn list(&self, user_id: &str, entity_type: Option<EntityType>) -> Result<Vec<EntityMapping>> {
            self.inner.list(user_id, entity_type)
        }
        fn get(&self, user_id: &str, id: &str) -> Result<Option<EntityMapping>> {
            self.inner.get(user_id, id)
        }
        fn insert(&self, mapping: &EntityMapping) -> Result<()> {
            self.inner.insert(mapping)
        }
        fn replace(&self, mapping: &EntityMapping) -> Result<()> {
            self.inner.replace(mapping)
        }
        fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
            self.inner.delete(user_id, id)
        }
    }

    #[test]
    fn test_resolve_maps_known_names_and_keeps_unknown() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        service
            .create_mapping("u1", "John Doe", &names(&["JOHN D", "johndoe99"]), EntityType::Person)
            .unwrap();

        let resolved = service.resolve_batch("u1", &names(&["JOHN D", "Jane"]), &[EntityType::Person]);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["JOHN D"], "John Doe");
        assert_eq!(resolved["Jane"], "Jane");
    }

    #[test]
    fn test_resolution_ignores_case_and_spacing() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        service
            .create_mapping("u1", "John Doe", &names(&["JOHN D"]), EntityType::Person)
            .unwrap();
        let resolved = service.resolve_batch("u1", &names(&["  john   d "]), &[EntityType::Person]);
        assert_eq!(resolved["  john   d "], "John Doe");
    }

    #[test]
    fn test_conflicting_create_is_rejected_and_first_mapping_survives() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        let first = service
            .create_mapping("u1", "John Doe", &names(&["JOHN D", "johndoe99"]), EntityType::Person)
            .unwrap();

        let err = service
            .create_mapping("u1", "Johnny", &names(&["john d", "jd"]), EntityType::Person)
            .unwrap_err();
        match err {
            IngestError::MappingConflict { names } => assert_eq!(names, vec!["john d".to_string()]),
            other => panic!("unexpected error: {other}"),
        }

        let mappings = service.list_mappings("u1", None).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].id, first.id);
        assert_eq!(mappings[0].mapped_names, names(&["JOHN D", "johndoe99"]));
        // the rejected create left no partial names behind
        let resolved = service.resolve_batch("u1", &names(&["jd"]), &[EntityType::Person]);
        assert_eq!(resolved["jd"], "jd");
    }

    #[test]
    fn test_update_revalidates_against_other_mappings() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        service
            .create_mapping("u1", "John Doe", &names(&["JOHN D"]), EntityType::Person)
            .unwrap();
        let jane = service
            .create_mapping("u1", "Jane Roe", &names(&["JANE R"]), EntityType::Person)
            .unwrap();

        let err = service
            .update_mapping("u1", &jane.id, None, Some(&names(&["JANE R", "JOHN D"])))
            .unwrap_err();
        assert!(matches!(err, IngestError::MappingConflict { .. }));

        // keeping its own names is not a conflict
        let updated = service
            .update_mapping("u1", &jane.id, Some("Jane"), Some(&names(&["JANE R", "jroe"])))
            .unwrap();
        assert_eq!(updated.canonical_name, "Jane");
        let resolved = service.resolve_batch("u1", &names(&["jroe", "JOHN D"]), &[EntityType::Person]);
        assert_eq!(resolved["jroe"], "Jane");
        assert_eq!(resolved["JOHN D"], "John Doe");
    }

    #[test]
    fn test_delete_reverts_to_identity() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        let mapping = service
            .create_mapping("u1", "Swiggy", &names(&["SWIGGY LTD"]), EntityType::Store)
            .unwrap();
        service.delete_mapping("u1", &mapping.id).unwrap();
        let resolved = service.resolve_batch("u1", &names(&["SWIGGY LTD"]), &[EntityType::Store]);
        assert_eq!(resolved["SWIGGY LTD"], "SWIGGY LTD");
        assert!(matches!(
            service.delete_mapping("u1", &mapping.id),
            Err(IngestError::NotFound(_))
        ));
    }

    #[test]
    fn test_blank_names_are_rejected() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        assert!(matches!(
            service.create_mapping("u1", "  ", &names(&["x"]), EntityType::Person),
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            service.create_mapping("u1", "X", &names(&["x", ""]), EntityType::Person),
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            service.create_mapping("u1", "X", &[], EntityType::Person),
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn test_one_query_per_entity_type() {
        let conn = conn();
        let store = CountingStore {
            inner: SqliteMappingStore::new(&conn),
            queries: Cell::new(0),
        };
        let service = CanonicalizationService::new(store);
        let many: Vec<String> = (0..500).map(|i| format!("name {}", i)).collect();

        service.resolve_batch("u1", &many, &[EntityType::Person, EntityType::Store]);
        assert_eq!(service.store.queries.get(), 2);

        service.resolve_batch("u1", &many[..3], &[EntityType::Person]);
        assert_eq!(service.store.queries.get(), 3);
    }

    #[test]
    fn test_first_requested_type_wins() {
        let conn = conn();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        service
            .create_mapping("u1", "Ravi (person)", &names(&["RAVI"]), EntityType::Person)
            .unwrap();
        service
            .create_mapping("u1", "Ravi Stores", &names(&["RAVI"]), EntityType::Store)
            .unwrap();
        let as_store = service.resolve_batch("u1", &names(&["RAVI"]), &[EntityType::Store, EntityType::Person]);
        assert_eq!(as_store["RAVI"], "Ravi Stores");
        let as_person = service.resolve_batch("u1", &names(&["RAVI"]), &[EntityType::Person, EntityType::Store]);
        assert_eq!(as_person["RAVI"], "Ravi (person)");
    }

    #[test]
    fn test_unavailable_store_degrades_to_identity() {
        // no tables provisioned
        let conn = Connection::open_in_memory().unwrap();
        let service = CanonicalizationService::new(SqliteMappingStore::new(&conn));
        let resolved = service.resolve_batch("u1", &names(&["JOHN D"]), &[EntityType::Person]);
        assert_eq!(resolved["JOHN D"], "JOHN D");
    }
}
