// Parse pipeline: loader -> bank parser -> buffer -> normalizer -> preview
//
// Pure with respect to storage: a preview never touches the database.

use crate::error::{IngestError, Result};
use crate::loader::{load_document, RawDocument, TextExtractor};
use crate::normalizer::{NormalizerSettings, Normalizer};
use crate::parser::ParserRegistry;
use crate::record::ParsedTransactionRecord;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub bank_code: String,
    pub source_document_id: String,
    pub records: Vec<ParsedTransactionRecord>,
    pub dropped_count: usize,
    pub filtered_count: usize,
    pub low_confidence_count: usize,
}

/// Everything a parse needs besides the document itself
pub struct ParseContext<'a> {
    pub extractor: Arc<dyn TextExtractor>,
    pub timeout: Duration,
    pub registry: &'a ParserRegistry,
    pub settings: &'a NormalizerSettings,
}

/// Parse a statement into a preview.
///
/// Fails with UnsupportedFormat / ExtractionFailure from the loader, and
/// NoTransactionsFound when nothing survives normalization.
pub fn parse_preview(document: &RawDocument, ctx: &ParseContext<'_>) -> Result<PreviewResult> {
    let extracted = load_document(document, Arc::clone(&ctx.extractor), ctx.timeout)?;

    let parser = ctx.registry.select(&extracted, document.bank_hint.as_deref());
    let groups = parser.parse(&extracted);
    let statement_account = parser.statement_account(&extracted);
    let source_document_id = document.source_document_id();

    let batch = Normalizer::new(ctx.settings).normalize(
        parser,
        &groups,
        statement_account.as_deref(),
        &source_document_id,
    );

    tracing::info!(
        filename = %document.filename,
        bank = parser.code(),
        groups = groups.len(),
        records = batch.records.len(),
        dropped = batch.dropped_count,
        filtered = batch.filtered_count,
        low_confidence = batch.low_confidence_count,
        "statement parsed"
    );

    if batch.records.is_empty() {
        return Err(IngestError::NoTransactionsFound {
            dropped: batch.dropped_count,
            filtered: batch.filtered_count,
        });
    }

    Ok(PreviewResult {
        bank_code: parser.code().to_string(),
        source_document_id,
        records: batch.records,
        dropped_count: batch.dropped_count,
        filtered_count: batch.filtered_count,
        low_confidence_count: batch.low_confidence_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LocalExtractor;

    const HDFC_STATEMENT: &str = "HDFC BANK LTD\n\
Account No : 50100012345678\n\
Date  Narration  Chq./Ref.No.  Value Dt  Withdrawal Amt.  Deposit Amt.  Closing Balance\n\
01/02/24  UPI-JOHN DOE-john@okaxis-UTIB0001234-412345678901-LUNCH  01/02/24  250.00  -  9750.00\n\
03/02/24  NEFT CR-SBIN0000123-ACME CORP-PAYROLL FEB-N034240123456  03/02/24  -  50000.00  59750.00\n\
Page 1 of 1\n";

    fn preview(bytes: &[u8], filename: &str, hint: Option<&str>) -> Result<PreviewResult> {
        let registry = ParserRegistry::with_defaults();
        let settings = NormalizerSettings::default();
        let ctx = ParseContext {
            extractor: Arc::new(LocalExtractor),
            timeout: Duration::from_secs(5),
            registry: &registry,
            settings: &settings,
        };
        let document = RawDocument::new(bytes.to_vec(), filename, hint.map(String::from))?;
        parse_preview(&document, &ctx)
    }

    #[test]
    fn test_hdfc_text_statement() {
        let result = preview(HDFC_STATEMENT.as_bytes(), "feb.txt", None).unwrap();
        assert_eq!(result.bank_code, "HDFC");
        assert_eq!(result.records.len(), 2);

        let lunch = &result.records[0];
        assert_eq!(lunch.date_iso, "2024-02-01");
        assert_eq!(lunch.debit_amount, 250.0);
        assert_eq!(lunch.person_name.as_deref(), Some("JOHN DOE"));
        assert_eq!(lunch.upi_id.as_deref(), Some("john@okaxis"));
        assert_eq!(lunch.transaction_id.as_deref(), Some("412345678901"));

        let salary = &result.records[1];
        assert_eq!(salary.credit_amount, 50000.0);
        assert_eq!(salary.transfer_type.as_deref(), Some("NEFT"));
        assert_eq!(salary.commodity.as_deref(), Some("PAYROLL FEB"));
    }

    #[test]
    fn test_multi_page_header_does_not_turn_expense_into_transfer() {
        let text = "HDFC BANK LTD\n\
Account No : 50100012345678\n\
Date  Narration  Chq./Ref.No.  Value Dt  Withdrawal Amt.  Deposit Amt.  Closing Balance\n\
05/02/24  POS 4111XXXXXXXX1111 AMAZON RETAIL  05/02/24  1,499.00  -  8,251.00\n\
Page 1 of 2\n\
\u{000C}HDFC BANK LTD\n\
Account No : 50100012345678\n\
Date  Narration  Chq./Ref.No.  Value Dt  Withdrawal Amt.  Deposit Amt.  Closing Balance\n\
07/02/24  ATM WDL MG ROAD  07/02/24  500.00  -  7,751.00\n\
Page 2 of 2\n";
        let result = preview(text.as_bytes(), "feb.txt", None).unwrap();
        assert_eq!(result.records.len(), 2);

        let pos = &result.records[0];
        assert_eq!(pos.financial_category, crate::record::FinancialCategory::Expense);
        assert_eq!(pos.account_number, None);
        assert!(!pos.description.contains("Account No"));
        assert!(!pos.raw_text.contains("HDFC BANK LTD"));
    }

    #[test]
    fn test_xlsx_statement() {
        let bytes = crate::loader::fixtures::xlsx_with_rows(&crate::loader::fixtures::statement_sheet());
        let result = preview(&bytes, "feb.xlsx", None).unwrap();
        assert_eq!(result.records.len(), 2);

        let atm = &result.records[0];
        assert_eq!(atm.date_iso, "2024-02-01");
        assert_eq!(atm.debit_amount, 500.0);
        assert_eq!(atm.balance, Some(9500.0));

        let salary = &result.records[1];
        assert_eq!(salary.date_iso, "2024-02-02");
        assert_eq!(salary.credit_amount, 20000.0);
        assert_eq!(salary.debit_amount, 0.0);
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let first = preview(HDFC_STATEMENT.as_bytes(), "feb.txt", None).unwrap();
        let second = preview(HDFC_STATEMENT.as_bytes(), "feb.txt", None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.records[0].source_document_id, first.source_document_id);
    }

    #[test]
    fn test_unsupported_format_fails_before_parsing() {
        let err = preview(b"a,b,c", "statement.csv", None).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_no_transactions_carries_counts() {
        let err = preview(b"Statement\n99/99/9999 MISC 100.00\n", "s.txt", None).unwrap_err();
        match err {
            IngestError::NoTransactionsFound { dropped, filtered } => {
                assert_eq!(dropped, 1);
                assert_eq!(filtered, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bank_hint_selects_strategy() {
        let text = "My Bank\n01-02-2024  UPI/JOHN/412345678901  500.00(Dr)  9,500.00(Cr)\n";
        let result = preview(text.as_bytes(), "s.txt", Some("KKBK")).unwrap();
        assert_eq!(result.bank_code, "KKBK");
        assert_eq!(result.records[0].debit_amount, 500.0);
    }
}
