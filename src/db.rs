// Storage: schema setup, dedup-aware transaction ledger, listing
//
// One Connection per request or command; nothing here holds global state.

use crate::error::{IngestError, Result};
use crate::record::ParsedTransactionRecord;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Open (creating if needed) and provision the database at `path`
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

/// Idempotent schema setup
pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode: readers never block the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // ==========================================================================
    // Transactions (dedup_key enforces import idempotency)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            bank_code TEXT NOT NULL,
            dedup_key TEXT UNIQUE NOT NULL,
            date_iso TEXT NOT NULL,
            description TEXT NOT NULL,
            debit_amount REAL NOT NULL,
            credit_amount REAL NOT NULL,
            balance REAL,
            category TEXT NOT NULL,
            person_name TEXT,
            store TEXT,
            raw_person_name TEXT,
            raw_store TEXT,
            transaction_id TEXT,
            raw_text TEXT NOT NULL,
            source_document_id TEXT NOT NULL,
            low_confidence INTEGER NOT NULL DEFAULT 0,
            mapped TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Entity mappings (one row per canonical name, one row per raw name)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS entity_mappings (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entity_mapping_names (
            mapping_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            raw_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            UNIQUE(user_id, entity_type, normalized_name)
        )",
        [],
    )?;

    // ==========================================================================
    // Field mappings (scope is "global" or "user:<id>")
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS field_mappings (
            scope TEXT NOT NULL,
            bank_code TEXT NOT NULL,
            mapping TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(scope, bank_code)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date_iso)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mappings_user_type ON entity_mappings(user_id, entity_type)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mapping_names_mapping ON entity_mapping_names(mapping_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// DEDUP KEY
// ============================================================================

/// Content fingerprint for records without a bank reference number
pub fn content_hash(record: &ParsedTransactionRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{:.2}|{:.2}|{}|{}",
        record.date_iso,
        record.debit_amount,
        record.credit_amount,
        record.balance.map(|b| format!("{:.2}", b)).unwrap_or_default(),
        record.description.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
    ));
    format!("{:x}", hasher.finalize())
}

/// Separates the dedup key parts so no two (user, bank, id) triples collide
const KEY_SEPARATOR: char = '\u{1f}';

/// SHA-256(user + bank + (transaction id or content hash))
pub fn compute_dedup_key(user_id: &str, bank_code: &str, record: &ParsedTransactionRecord) -> String {
    let identity = match record.transaction_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => content_hash(record),
    };
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}{sep}{}{sep}{}",
        user_id,
        bank_code,
        identity,
        sep = KEY_SEPARATOR
    ));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// LEDGER
// ============================================================================

/// A canonicalized, field-mapped record ready to persist
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub dedup_key: String,
    pub record: ParsedTransactionRecord,
    /// Names as printed, before canonicalization. Listing resolves from these.
    pub raw_person_name: Option<String>,
    pub raw_store: Option<String>,
    pub mapped: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOutcome {
    pub created: usize,
    pub skipped_duplicates: usize,
}

/// Dedup-aware bulk insert
pub trait TransactionSink {
    fn insert_batch(&self, rows: &[NewTransaction]) -> Result<InsertOutcome>;
}

pub struct SqliteSink<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSink<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteSink { conn }
    }
}

impl TransactionSink for SqliteSink<'_> {
    fn insert_batch(&self, rows: &[NewTransaction]) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transactions (
                    id, user_id, bank_code, dedup_key, date_iso, description,
                    debit_amount, credit_amount, balance, category, person_name, store,
                    raw_person_name, raw_store, transaction_id, raw_text, source_document_id,
                    low_confidence, mapped, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            )?;

            for row in rows {
                let record = &row.record;
                let result = stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    row.user_id,
                    record.bank_code,
                    row.dedup_key,
                    record.date_iso,
                    record.description,
                    record.debit_amount,
                    record.credit_amount,
                    record.balance,
                    record.financial_category.as_str(),
                    record.person_name,
                    record.store,
                    row.raw_person_name,
                    row.raw_store,
                    record.transaction_id,
                    record.raw_text,
                    record.source_document_id,
                    record.low_confidence,
                    serde_json::to_string(&row.mapped)?,
                    Utc::now(),
                ]);

                match result {
                    Ok(_) => outcome.created += 1,
                    Err(e) if IngestError::is_constraint_violation(&e) => {
                        outcome.skipped_duplicates += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tx.commit()?;

        tracing::info!(
            created = outcome.created,
            skipped_duplicates = outcome.skipped_duplicates,
            "transactions persisted"
        );
        Ok(outcome)
    }
}

// ============================================================================
// LISTING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransaction {
    pub id: String,
    pub bank_code: String,
    pub date_iso: String,
    pub description: String,
    pub debit_amount: f64,
    pub credit_amount: f64,
    pub balance: Option<f64>,
    pub category: String,
    pub person_name: Option<String>,
    pub store: Option<String>,
    /// Names as printed in the statement
    pub raw_person_name: Option<String>,
    pub raw_store: Option<String>,
    pub transaction_id: Option<String>,
    pub source_document_id: String,
    pub low_confidence: bool,
    /// Destination row produced by the field mapping
    pub mapped: Value,
    pub created_at: DateTime<Utc>,
}

/// Newest first
pub fn list_transactions(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<StoredTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, bank_code, date_iso, description, debit_amount, credit_amount, balance,
                category, person_name, store, raw_person_name, raw_store, transaction_id,
                source_document_id, low_confidence, mapped, created_at
         FROM transactions
         WHERE user_id = ?1
         ORDER BY date_iso DESC, created_at DESC
         LIMIT ?2",
    )?;

    let transactions = stmt
        .query_map(params![user_id, limit as i64], |row| {
            let mapped_json: String = row.get(15)?;
            Ok(StoredTransaction {
                id: row.get(0)?,
                bank_code: row.get(1)?,
                date_iso: row.get(2)?,
                description: row.get(3)?,
                debit_amount: row.get(4)?,
                credit_amount: row.get(5)?,
                balance: row.get(6)?,
                category: row.get(7)?,
                person_name: row.get(8)?,
                store: row.get(9)?,
                raw_person_name: row.get(10)?,
                raw_store: row.get(11)?,
                transaction_id: row.get(12)?,
                source_document_id: row.get(13)?,
                low_confidence: row.get(14)?,
                mapped: serde_json::from_str(&mapped_json).unwrap_or(Value::Null),
                created_at: row.get(16)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(transactions)
}

pub fn count_transactions(conn: &Connection, user_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
