// Field Mapping Configuration
//
// Per bank code, which parser output lands in which destination column.
// Lookup order: user scope -> global default for the bank -> built-in default.

use crate::error::{IngestError, Result};
use crate::record::ParsedTransactionRecord;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// FIELDS
// ============================================================================

/// Parser outputs that can be mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceField {
    Date,
    DateIso,
    Description,
    DebitAmount,
    CreditAmount,
    Balance,
    FinancialCategory,
    TransactionId,
    AccountNumber,
    TransferType,
    UpiId,
    PersonName,
    Branch,
    Store,
    Commodity,
    RawText,
}

impl SourceField {
    pub const ALL: [SourceField; 16] = [
        SourceField::Date,
        SourceField::DateIso,
        SourceField::Description,
        SourceField::DebitAmount,
        SourceField::CreditAmount,
        SourceField::Balance,
        SourceField::FinancialCategory,
        SourceField::TransactionId,
        SourceField::AccountNumber,
        SourceField::TransferType,
        SourceField::UpiId,
        SourceField::PersonName,
        SourceField::Branch,
        SourceField::Store,
        SourceField::Commodity,
        SourceField::RawText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceField::Date => "date",
            SourceField::DateIso => "dateIso",
            SourceField::Description => "description",
            SourceField::DebitAmount => "debitAmount",
            SourceField::CreditAmount => "creditAmount",
            SourceField::Balance => "balance",
            SourceField::FinancialCategory => "financialCategory",
            SourceField::TransactionId => "transactionId",
            SourceField::AccountNumber => "accountNumber",
            SourceField::TransferType => "transferType",
            SourceField::UpiId => "upiId",
            SourceField::PersonName => "personName",
            SourceField::Branch => "branch",
            SourceField::Store => "store",
            SourceField::Commodity => "commodity",
            SourceField::RawText => "rawText",
        }
    }

    pub fn parse(name: &str) -> Option<SourceField> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name.trim())
    }

    /// Value of this field on a record
    pub fn value(&self, record: &ParsedTransactionRecord) -> Value {
        let text = |s: &Option<String>| s.clone().map(Value::String).unwrap_or(Value::Null);
        match self {
            SourceField::Date => Value::String(record.date.clone()),
            SourceField::DateIso => Value::String(record.date_iso.clone()),
            SourceField::Description => Value::String(record.description.clone()),
            SourceField::DebitAmount => Value::from(record.debit_amount),
            SourceField::CreditAmount => Value::from(record.credit_amount),
            SourceField::Balance => record.balance.map(Value::from).unwrap_or(Value::Null),
            SourceField::FinancialCategory => Value::String(record.financial_category.as_str().to_string()),
            SourceField::TransactionId => text(&record.transaction_id),
            SourceField::AccountNumber => text(&record.account_number),
            SourceField::TransferType => text(&record.transfer_type),
            SourceField::UpiId => text(&record.upi_id),
            SourceField::PersonName => text(&record.person_name),
            SourceField::Branch => text(&record.branch),
            SourceField::Store => text(&record.store),
            SourceField::Commodity => text(&record.commodity),
            SourceField::RawText => Value::String(record.raw_text.clone()),
        }
    }
}

/// Destination schema columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetField {
    Date,
    Description,
    DebitAmount,
    CreditAmount,
    Balance,
    Category,
    ReferenceNumber,
    AccountNumber,
    PaymentMode,
    UpiId,
    PersonName,
    Store,
    Notes,
}

impl TargetField {
    pub const ALL: [TargetField; 13] = [
        TargetField::Date,
        TargetField::Description,
        TargetField::DebitAmount,
        TargetField::CreditAmount,
        TargetField::Balance,
        TargetField::Category,
        TargetField::ReferenceNumber,
        TargetField::AccountNumber,
        TargetField::PaymentMode,
        TargetField::UpiId,
        TargetField::PersonName,
        TargetField::Store,
        TargetField::Notes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::Date => "date",
            TargetField::Description => "description",
            TargetField::DebitAmount => "debitAmount",
            TargetField::CreditAmount => "creditAmount",
            TargetField::Balance => "balance",
            TargetField::Category => "category",
            TargetField::ReferenceNumber => "referenceNumber",
            TargetField::AccountNumber => "accountNumber",
            TargetField::PaymentMode => "paymentMode",
            TargetField::UpiId => "upiId",
            TargetField::PersonName => "personName",
            TargetField::Store => "store",
            TargetField::Notes => "notes",
        }
    }

    pub fn parse(name: &str) -> Option<TargetField> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name.trim())
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingScope {
    User(String),
    Global,
}

impl MappingScope {
    fn key(&self) -> String {
        match self {
            MappingScope::User(user_id) => format!("user:{}", user_id),
            MappingScope::Global => "global".to_string(),
        }
    }
}

/// Where a resolved configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingOrigin {
    User,
    Global,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingConfig {
    pub bank_code: String,
    pub origin: MappingOrigin,
    pub mapping: BTreeMap<SourceField, TargetField>,
}

impl FieldMappingConfig {
    /// Built-in mapping used when nobody configured the bank
    pub fn builtin(bank_code: &str) -> Self {
        let mapping = [
            (SourceField::DateIso, TargetField::Date),
            (SourceField::Description, TargetField::Description),
            (SourceField::DebitAmount, TargetField::DebitAmount),
            (SourceField::CreditAmount, TargetField::CreditAmount),
            (SourceField::Balance, TargetField::Balance),
            (SourceField::FinancialCategory, TargetField::Category),
            (SourceField::TransactionId, TargetField::ReferenceNumber),
            (SourceField::AccountNumber, TargetField::AccountNumber),
            (SourceField::TransferType, TargetField::PaymentMode),
            (SourceField::UpiId, TargetField::UpiId),
            (SourceField::PersonName, TargetField::PersonName),
            (SourceField::Store, TargetField::Store),
            (SourceField::Commodity, TargetField::Notes),
        ]
        .into_iter()
        .collect();
        FieldMappingConfig {
            bank_code: normalize_bank_code(bank_code),
            origin: MappingOrigin::Default,
            mapping,
        }
    }

    /// Destination row for one record
    pub fn apply(&self, record: &ParsedTransactionRecord) -> Map<String, Value> {
        self.mapping
            .iter()
            .map(|(source, target)| (target.as_str().to_string(), source.value(record)))
            .collect()
    }
}

fn normalize_bank_code(bank_code: &str) -> String {
    bank_code.trim().to_ascii_uppercase()
}

/// Check every name and reject two sources claiming one destination
pub fn validate_mapping(raw: &HashMap<String, String>) -> Result<BTreeMap<SourceField, TargetField>> {
    if raw.is_empty() {
        return Err(IngestError::Validation("field mapping must not be empty".to_string()));
    }
    let mut mapping = BTreeMap::new();
    let mut claimed: HashSet<TargetField> = HashSet::new();

    // sorted for stable error messages
    let mut entries: Vec<(&String, &String)> = raw.iter().collect();
    entries.sort();

    for (source_name, target_name) in entries {
        let source = SourceField::parse(source_name)
            .ok_or_else(|| IngestError::Validation(format!("unknown source field '{}'", source_name)))?;
        let target = TargetField::parse(target_name)
            .ok_or_else(|| IngestError::Validation(format!("unknown destination field '{}'", target_name)))?;
        if !claimed.insert(target) {
            return Err(IngestError::Validation(format!(
                "destination '{}' is claimed by more than one source",
                target.as_str()
            )));
        }
        mapping.insert(source, target);
    }
    Ok(mapping)
}

// ============================================================================
// STORAGE
// ============================================================================

fn load_scoped(conn: &Connection, scope: &MappingScope, bank_code: &str) -> Result<Option<BTreeMap<SourceField, TargetField>>> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT mapping FROM field_mappings WHERE scope = ?1 AND bank_code = ?2",
            params![scope.key(), bank_code],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// User mapping, else global default for the bank, else built-in
pub fn get_mapping(conn: &Connection, user_id: &str, bank_code: &str) -> Result<FieldMappingConfig> {
    let bank_code = normalize_bank_code(bank_code);
    let scopes = [
        (MappingScope::User(user_id.to_string()), MappingOrigin::User),
        (MappingScope::Global, MappingOrigin::Global),
    ];
    for (scope, origin) in scopes {
        if let Some(mapping) = load_scoped(conn, &scope, &bank_code)? {
            return Ok(FieldMappingConfig {
                bank_code,
                origin,
                mapping,
            });
        }
    }
    Ok(FieldMappingConfig::builtin(&bank_code))
}

/// Validate then upsert. A failed validation leaves the stored config alone.
pub fn set_mapping(
    conn: &Connection,
    scope: &MappingScope,
    bank_code: &str,
    raw: &HashMap<String, String>,
) -> Result<FieldMappingConfig> {
    let bank_code = normalize_bank_code(bank_code);
    if bank_code.is_empty() {
        return Err(IngestError::Validation("bank code must not be blank".to_string()));
    }
    let mapping = validate_mapping(raw)?;

    conn.execute(
        "INSERT INTO field_mappings (scope, bank_code, mapping, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(scope, bank_code) DO UPDATE SET mapping = excluded.mapping, updated_at = excluded.updated_at",
        params![scope.key(), bank_code, serde_json::to_string(&mapping)?, Utc::now()],
    )?;
    tracing::info!(scope = %scope.key(), bank = %bank_code, fields = mapping.len(), "field mapping saved");

    Ok(FieldMappingConfig {
        bank_code,
        origin: match scope {
            MappingScope::User(_) => MappingOrigin::User,
            MappingScope::Global => MappingOrigin::Global,
        },
        mapping,
    })
}

/// Remove a scoped config. Returns false when none existed.
pub fn reset_mapping(conn: &Connection, scope: &MappingScope, bank_code: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM field_mappings WHERE scope = ?1 AND bank_code = ?2",
        params![scope.key(), normalize_bank_code(bank_code)],
    )?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::record::fixtures::record;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(s, t)| (s.to_string(), t.to_string())).collect()
    }

    #[test]
    fn test_field_name_tables_are_complete() {
        assert_eq!(SourceField::ALL.len(), 16);
        assert_eq!(TargetField::ALL.len(), 13);
        for field in SourceField::ALL {
            assert_eq!(SourceField::parse(field.as_str()), Some(field));
            assert_eq!(serde_json::to_value(field).unwrap(), field.as_str());
        }
        for field in TargetField::ALL {
            assert_eq!(TargetField::parse(field.as_str()), Some(field));
        }
    }

    #[test]
    fn test_lookup_order_user_global_builtin() {
        let conn = conn();
        assert_eq!(get_mapping(&conn, "u1", "hdfc").unwrap().origin, MappingOrigin::Default);

        set_mapping(&conn, &MappingScope::Global, "HDFC", &raw(&[("description", "notes")])).unwrap();
        let global = get_mapping(&conn, "u1", "HDFC").unwrap();
        assert_eq!(global.origin, MappingOrigin::Global);
        assert_eq!(global.mapping.get(&SourceField::Description), Some(&TargetField::Notes));

        set_mapping(&conn, &MappingScope::User("u1".to_string()), "hdfc", &raw(&[("rawText", "notes")])).unwrap();
        assert_eq!(get_mapping(&conn, "u1", "HDFC").unwrap().origin, MappingOrigin::User);
        // other users still see the global default
        assert_eq!(get_mapping(&conn, "u2", "HDFC").unwrap().origin, MappingOrigin::Global);

        assert!(reset_mapping(&conn, &MappingScope::User("u1".to_string()), "HDFC").unwrap());
        assert_eq!(get_mapping(&conn, "u1", "HDFC").unwrap().origin, MappingOrigin::Global);
    }

    #[test]
    fn test_invalid_mapping_leaves_existing_config() {
        let conn = conn();
        let scope = MappingScope::User("u1".to_string());
        set_mapping(&conn, &scope, "SBIN", &raw(&[("description", "description")])).unwrap();

        let unknown_target = set_mapping(&conn, &scope, "SBIN", &raw(&[("description", "memo")]));
        assert!(matches!(unknown_target, Err(IngestError::Validation(_))));

        let unknown_source = set_mapping(&conn, &scope, "SBIN", &raw(&[("merchant", "store")]));
        assert!(matches!(unknown_source, Err(IngestError::Validation(_))));

        let duplicate = set_mapping(&conn, &scope, "SBIN", &raw(&[("description", "notes"), ("rawText", "notes")]));
        assert!(matches!(duplicate, Err(IngestError::Validation(_))));

        let current = get_mapping(&conn, "u1", "SBIN").unwrap();
        assert_eq!(current.mapping.len(), 1);
        assert_eq!(current.mapping.get(&SourceField::Description), Some(&TargetField::Description));
    }

    #[test]
    fn test_apply_builds_destination_row() {
        let mut rec = record("2024-02-01", "UPI/1234/JOHN DOE/HDFC", 250.0, 0.0);
        rec.person_name = Some("John Doe".to_string());
        rec.transaction_id = Some("1234".to_string());

        let row = FieldMappingConfig::builtin("HDFC").apply(&rec);
        assert_eq!(row["date"], "2024-02-01");
        assert_eq!(row["debitAmount"], 250.0);
        assert_eq!(row["category"], "EXPENSE");
        assert_eq!(row["referenceNumber"], "1234");
        assert_eq!(row["personName"], "John Doe");
        assert_eq!(row["store"], Value::Null);
        assert!(!row.contains_key("branch"));
    }
}
