// ParsedTransactionRecord - the validated output of the normalizer

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinancialCategory {
    Income,
    Expense,
    Transfer,
    Unknown,
}

impl FinancialCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinancialCategory::Income => "INCOME",
            FinancialCategory::Expense => "EXPENSE",
            FinancialCategory::Transfer => "TRANSFER",
            FinancialCategory::Unknown => "UNKNOWN",
        }
    }
}

/// One statement line item, ready for review.
///
/// Emitted records hold: exactly one of debit/credit > 0 (unless TRANSFER),
/// a valid `date_iso`, and a non-empty `raw_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTransactionRecord {
    /// Date token as printed in the statement
    pub date: String,
    pub date_iso: String,
    pub description: String,
    pub debit_amount: f64,
    pub credit_amount: f64,
    pub balance: Option<f64>,
    pub financial_category: FinancialCategory,
    pub bank_code: String,
    pub transaction_id: Option<String>,
    pub account_number: Option<String>,
    pub transfer_type: Option<String>,
    pub upi_id: Option<String>,
    pub person_name: Option<String>,
    pub branch: Option<String>,
    pub store: Option<String>,
    pub commodity: Option<String>,
    pub raw_text: String,
    pub source_document_id: String,
    /// An amount failed to parse or its direction was guessed
    #[serde(default)]
    pub low_confidence: bool,
}

impl ParsedTransactionRecord {
    /// Signed amount: credits positive, debits negative
    pub fn net_amount(&self) -> f64 {
        self.credit_amount - self.debit_amount
    }

    /// Re-check the record invariants. Used at the import boundary where
    /// records come back from a reviewer and may have been edited.
    pub fn validate(&self) -> Result<(), String> {
        if self.raw_text.trim().is_empty() {
            return Err("rawText is empty".to_string());
        }
        if chrono::NaiveDate::parse_from_str(&self.date_iso, "%Y-%m-%d").is_err() {
            return Err(format!("dateIso '{}' is not a valid date", self.date_iso));
        }
        if self.debit_amount < 0.0 || self.credit_amount < 0.0 {
            return Err("amounts must not be negative".to_string());
        }
        let positives = [self.debit_amount, self.credit_amount]
            .iter()
            .filter(|a| **a > 0.0)
            .count();
        match self.financial_category {
            FinancialCategory::Transfer if positives >= 1 => Ok(()),
            FinancialCategory::Income if positives == 1 && self.credit_amount > 0.0 => Ok(()),
            FinancialCategory::Expense if positives == 1 && self.debit_amount > 0.0 => Ok(()),
            FinancialCategory::Unknown => Err("UNKNOWN records cannot be imported".to_string()),
            other => Err(format!(
                "{} record must carry exactly one matching amount",
                other.as_str()
            )),
        }
    }
}
