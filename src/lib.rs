// Statement Ingest - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod buffer;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod field_mapping;
pub mod fields;
pub mod import;
pub mod loader;
pub mod logging;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod record;

// Re-export commonly used types
pub use config::IngestConfig;
pub use db::{
    compute_dedup_key, list_transactions, open_database, setup_database,
    InsertOutcome, NewTransaction, SqliteSink, StoredTransaction, TransactionSink,
};
pub use entities::{
    CanonicalizationService, EntityMapping, EntityType, MappingStore, SqliteMappingStore,
};
pub use error::{IngestError, Result};
pub use field_mapping::{
    get_mapping, reset_mapping, set_mapping, FieldMappingConfig, MappingOrigin, MappingScope,
    SourceField, TargetField,
};
pub use import::{import_records, list_canonical_transactions, ImportSummary};
pub use loader::{DocumentFormat, LocalExtractor, RawDocument, TextExtractor};
pub use normalizer::{DateOrder, NormalizerSettings};
pub use parser::{BankInfo, BankParser, ParserRegistry};
pub use pipeline::{parse_preview, ParseContext, PreviewResult};
pub use record::{FinancialCategory, ParsedTransactionRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
