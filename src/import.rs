// Import: reviewed records -> canonical names -> field mapping -> ledger
//
// Records come back from a reviewer, so each one is re-validated. Names are
// resolved with one batch lookup per entity type for the whole import.

use crate::db::{compute_dedup_key, list_transactions, NewTransaction, SqliteSink, StoredTransaction, TransactionSink};
use crate::entities::{CanonicalizationService, EntityType, MappingStore, SqliteMappingStore};
use crate::error::{IngestError, Result};
use crate::field_mapping::{get_mapping, FieldMappingConfig, TargetField};
use crate::record::ParsedTransactionRecord;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub created: usize,
    pub skipped_duplicates: usize,
    pub rejected: usize,
}

/// Import over the SQLite stores behind `conn`
pub fn import_records(conn: &Connection, user_id: &str, records: &[ParsedTransactionRecord]) -> Result<ImportSummary> {
    let canon = CanonicalizationService::new(SqliteMappingStore::new(conn));
    let sink = SqliteSink::new(conn);
    import_with(user_id, records, &canon, |bank| get_mapping(conn, user_id, bank), &sink)
}

/// Import through explicit collaborators.
///
/// `field_mapping` is asked once per distinct bank code in the batch.
pub fn import_with<S, T, F>(
    user_id: &str,
    records: &[ParsedTransactionRecord],
    canon: &CanonicalizationService<S>,
    mut field_mapping: F,
    sink: &T,
) -> Result<ImportSummary>
where
    S: MappingStore,
    T: TransactionSink,
    F: FnMut(&str) -> Result<FieldMappingConfig>,
{
    if user_id.trim().is_empty() {
        return Err(IngestError::Validation("user id must not be blank".to_string()));
    }

    let mut accepted: Vec<ParsedTransactionRecord> = Vec::with_capacity(records.len());
    let mut rejected = 0;
    for record in records {
        match record.validate() {
            Ok(()) => accepted.push(record.clone()),
            Err(reason) => {
                tracing::debug!(date = %record.date, reason = %reason, "record rejected");
                rejected += 1;
            }
        }
    }

    let raw_names: Vec<(Option<String>, Option<String>)> = accepted
        .iter()
        .map(|r| (r.person_name.clone(), r.store.clone()))
        .collect();
    canonicalize(user_id, &mut accepted, canon);

    let mut configs: HashMap<String, FieldMappingConfig> = HashMap::new();
    let mut rows = Vec::with_capacity(accepted.len());
    for (record, (raw_person_name, raw_store)) in accepted.into_iter().zip(raw_names) {
        if !configs.contains_key(&record.bank_code) {
            let config = field_mapping(&record.bank_code)?;
            configs.insert(record.bank_code.clone(), config);
        }
        let mapped = match configs.get(&record.bank_code) {
            Some(config) => config.apply(&record),
            None => FieldMappingConfig::builtin(&record.bank_code).apply(&record),
        };
        rows.push(NewTransaction {
            user_id: user_id.to_string(),
            dedup_key: compute_dedup_key(user_id, &record.bank_code, &record),
            record,
            raw_person_name,
            raw_store,
            mapped,
        });
    }

    let outcome = if rows.is_empty() {
        Default::default()
    } else {
        sink.insert_batch(&rows)?
    };

    let summary = ImportSummary {
        created: outcome.created,
        skipped_duplicates: outcome.skipped_duplicates,
        rejected,
    };
    tracing::info!(
        user_id,
        created = summary.created,
        skipped_duplicates = summary.skipped_duplicates,
        rejected = summary.rejected,
        "import finished"
    );
    Ok(summary)
}

/// Replace person and store names with their canonical forms
fn canonicalize<S: MappingStore>(
    user_id: &str,
    records: &mut [ParsedTransactionRecord],
    canon: &CanonicalizationService<S>,
) {
    let persons = distinct(records.iter().filter_map(|r| r.person_name.as_deref()));
    let stores = distinct(records.iter().filter_map(|r| r.store.as_deref()));

    let person_map = if persons.is_empty() {
        HashMap::new()
    } else {
        canon.resolve_batch(user_id, &persons, &[EntityType::Person])
    };
    let store_map = if stores.is_empty() {
        HashMap::new()
    } else {
        canon.resolve_batch(user_id, &stores, &[EntityType::Store])
    };

    for record in records.iter_mut() {
        replace_name(&mut record.person_name, &person_map);
        replace_name(&mut record.store, &store_map);
    }
}

fn distinct<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn replace_name(slot: &mut Option<String>, resolved: &HashMap<String, String>) {
    if let Some(name) = slot.as_mut() {
        if let Some(canonical) = resolved.get(name.as_str()) {
            *name = canonical.clone();
        }
    }
}

// ============================================================================
// LISTING
// ============================================================================

/// Stored rows with the user's current canonical names applied.
///
/// Names resolve from the spelling printed in the statement, once for the
/// page. Mappings created, renamed or deleted after import show up here.
pub fn list_canonical_transactions(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<StoredTransaction>> {
    let mut transactions = list_transactions(conn, user_id, limit)?;
    let canon = CanonicalizationService::new(SqliteMappingStore::new(conn));

    let persons = distinct(transactions.iter().filter_map(|t| t.raw_person_name.as_deref()));
    let stores = distinct(transactions.iter().filter_map(|t| t.raw_store.as_deref()));
    let person_map = canon.resolve_batch(user_id, &persons, &[EntityType::Person]);
    let store_map = canon.resolve_batch(user_id, &stores, &[EntityType::Store]);

    for t in &mut transactions {
        let person = resolve_raw(&t.raw_person_name, &person_map);
        let store = resolve_raw(&t.raw_store, &store_map);
        if let Value::Object(mapped) = &mut t.mapped {
            refresh_mapped(mapped, TargetField::PersonName, &t.person_name, &person);
            refresh_mapped(mapped, TargetField::Store, &t.store, &store);
        }
        if t.raw_person_name.is_some() {
            t.person_name = person;
        }
        if t.raw_store.is_some() {
            t.store = store;
        }
    }
    Ok(transactions)
}

fn resolve_raw(raw: &Option<String>, resolved: &HashMap<String, String>) -> Option<String> {
    raw.as_ref()
        .map(|name| resolved.get(name).cloned().unwrap_or_else(|| name.clone()))
}

/// Swap the import-time name in the mapped row for the current one
fn refresh_mapped(
    mapped: &mut serde_json::Map<String, Value>,
    field: TargetField,
    stored: &Option<String>,
    current: &Option<String>,
) {
    let (Some(stored), Some(current)) = (stored, current) else {
        return;
    };
    if let Some(Value::String(name)) = mapped.get_mut(field.as_str()) {
        if name == stored {
            *name = current.clone();
        }
    }
}
