// MappingStore - persistence seam for entity mappings
//
// The SQLite store relies on UNIQUE(user_id, entity_type, normalized_name) in
// entity_mapping_names: concurrent writers claiming the same raw name cannot
// both commit, the loser sees a MappingConflict.

use super::mapping::{normalize_name, EntityMapping, EntityType};
use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;

pub trait MappingStore {
    /// Every (normalized raw name, canonical name) pair for one user and type.
    /// One storage round trip.
    fn mapped_names(&self, user_id: &str, entity_type: EntityType) -> Result<Vec<(String, String)>>;

    fn list(&self, user_id: &str, entity_type: Option<EntityType>) -> Result<Vec<EntityMapping>>;

    fn get(&self, user_id: &str, id: &str) -> Result<Option<EntityMapping>>;

    /// Atomic insert. MappingConflict if any name is owned by another mapping.
    fn insert(&self, mapping: &EntityMapping) -> Result<()>;

    /// Atomic replace of canonical name and names. Same conflict rule.
    fn replace(&self, mapping: &EntityMapping) -> Result<()>;

    /// Returns false when nothing was deleted
    fn delete(&self, user_id: &str, id: &str) -> Result<bool>;
}

pub struct SqliteMappingStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteMappingStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteMappingStore { conn }
    }

    fn write_tx(&self) -> Result<Transaction<'c>> {
        Ok(Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?)
    }
}

/// Raw names of `mapping` already owned by a different mapping
fn contested_names(conn: &Connection, mapping: &EntityMapping) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT normalized_name FROM entity_mapping_names
         WHERE user_id = ?1 AND entity_type = ?2 AND mapping_id != ?3",
    )?;
    let owned: std::collections::HashSet<String> = stmt
        .query_map(
            params![mapping.user_id, mapping.entity_type.as_str(), mapping.id],
            |row| row.get(0),
        )?
        .collect::<std::result::Result<_, _>>()?;

    Ok(mapping
        .mapped_names
        .iter()
        .filter(|name| owned.contains(&normalize_name(name)))
        .cloned()
        .collect())
}

fn insert_names(conn: &Connection, mapping: &EntityMapping) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO entity_mapping_names (mapping_id, user_id, entity_type, raw_name, normalized_name)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for name in &mapping.mapped_names {
        let result = stmt.execute(params![
            mapping.id,
            mapping.user_id,
            mapping.entity_type.as_str(),
            name,
            normalize_name(name),
        ]);
        match result {
            Ok(_) => {}
            Err(e) if IngestError::is_constraint_violation(&e) => {
                return Err(IngestError::MappingConflict {
                    names: vec![name.clone()],
                })
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn ensure_unclaimed(conn: &Connection, mapping: &EntityMapping) -> Result<()> {
    let contested = contested_names(conn, mapping)?;
    if contested.is_empty() {
        Ok(())
    } else {
        Err(IngestError::MappingConflict { names: contested })
    }
}

impl MappingStore for SqliteMappingStore<'_> {
    fn mapped_names(&self, user_id: &str, entity_type: EntityType) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT n.normalized_name, m.canonical_name
             FROM entity_mapping_names n
             JOIN entity_mappings m ON m.id = n.mapping_id
             WHERE n.user_id = ?1 AND n.entity_type = ?2",
        )?;
        let pairs = stmt
            .query_map(params![user_id, entity_type.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    fn list(&self, user_id: &str, entity_type: Option<EntityType>) -> Result<Vec<EntityMapping>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.entity_type, m.canonical_name, m.created_at, m.updated_at, n.raw_name
             FROM entity_mappings m
             LEFT JOIN entity_mapping_names n ON n.mapping_id = m.id
             WHERE m.user_id = ?1 AND (?2 IS NULL OR m.entity_type = ?2)
             ORDER BY m.created_at, m.id, n.rowid",
        )?;
        let rows = stmt
            .query_map(params![user_id, entity_type.map(|t| t.as_str())], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                    row.get::<_, DateTime<Utc>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut mappings: Vec<EntityMapping> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (id, kind, canonical_name, created_at, updated_at, raw_name) in rows {
            let slot = match index.get(&id) {
                Some(slot) => *slot,
                None => {
                    let entity_type = EntityType::parse(&kind).ok_or_else(|| {
                        IngestError::Validation(format!("stored mapping {} has unknown type {}", id, kind))
                    })?;
                    mappings.push(EntityMapping {
                        id: id.clone(),
                        user_id: user_id.to_string(),
                        entity_type,
                        canonical_name,
                        mapped_names: Vec::new(),
                        created_at,
                        updated_at,
                    });
                    index.insert(id, mappings.len() - 1);
                    mappings.len() - 1
                }
            };
            if let Some(raw_name) = raw_name {
                mappings[slot].mapped_names.push(raw_name);
            }
        }
        Ok(mappings)
    }

    fn get(&self, user_id: &str, id: &str) -> Result<Option<EntityMapping>> {
        Ok(self.list(user_id, None)?.into_iter().find(|m| m.id == id))
    }

    fn insert(&self, mapping: &EntityMapping) -> Result<()> {
        let tx = self.write_tx()?;
        ensure_unclaimed(&tx, mapping)?;
        tx.execute(
            "INSERT INTO entity_mappings (id, user_id, entity_type, canonical_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                mapping.id,
                mapping.user_id,
                mapping.entity_type.as_str(),
                mapping.canonical_name,
                mapping.created_at,
                mapping.updated_at,
            ],
        )?;
        insert_names(&tx, mapping)?;
        tx.commit()?;
        Ok(())
    }

    fn replace(&self, mapping: &EntityMapping) -> Result<()> {
        let tx = self.write_tx()?;
        ensure_unclaimed(&tx, mapping)?;
        let updated = tx.execute(
            "UPDATE entity_mappings SET canonical_name = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![mapping.canonical_name, mapping.updated_at, mapping.id, mapping.user_id],
        )?;
        if updated == 0 {
            return Err(IngestError::NotFound(format!("entity mapping {}", mapping.id)));
        }
        tx.execute(
            "DELETE FROM entity_mapping_names WHERE mapping_id = ?1",
            params![mapping.id],
        )?;
        insert_names(&tx, mapping)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let tx = self.write_tx()?;
        let deleted = tx.execute(
            "DELETE FROM entity_mappings WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if deleted > 0 {
            tx.execute(
                "DELETE FROM entity_mapping_names WHERE mapping_id = ?1",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }
}
