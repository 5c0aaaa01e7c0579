// Error taxonomy for the ingestion pipeline and the mapping stores

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// File extension is not one of the supported statement formats
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The extractor failed, produced nothing, or ran past its deadline
    #[error("text extraction failed: {0}")]
    ExtractionFailure(String),

    /// Extraction worked but no record survived normalization
    #[error("no transactions found ({dropped} dropped for invalid dates, {filtered} without amounts)")]
    NoTransactionsFound { dropped: usize, filtered: usize },

    /// One or more raw names already belong to another canonical mapping
    #[error("names already mapped to another canonical name: {}", .names.join(", "))]
    MappingConflict { names: Vec<String> },

    /// The mapping store could not be reached. Never surfaced to API users.
    #[error("canonicalization store unavailable: {0}")]
    CanonicalizationUnavailable(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// True when a rusqlite failure was a UNIQUE/constraint violation
    pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_conflict_lists_names() {
        let err = IngestError::MappingConflict {
            names: vec!["JOHN D".to_string(), "johndoe99".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "names already mapped to another canonical name: JOHN D, johndoe99"
        );
    }

    #[test]
    fn test_no_transactions_found_reports_counts() {
        let err = IngestError::NoTransactionsFound { dropped: 3, filtered: 1 };
        assert!(err.to_string().contains("3 dropped"));
        assert!(err.to_string().contains("1 without amounts"));
    }
}
