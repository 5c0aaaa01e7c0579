// Field Normalizer
// Turns flushed line groups into validated ParsedTransactionRecords
//
// Never fails as a whole: records with unparseable dates are dropped and
// counted, records without any amount are filtered and counted.

use crate::buffer::LineGroup;
use crate::fields::{contains_phrase, extract_secondary};
use crate::parser::{BankParser, Direction, RawAmounts};
use crate::record::{FinancialCategory, ParsedTransactionRecord};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Tolerance when comparing an amount against a running-balance delta
const BALANCE_EPSILON: f64 = 0.01;

// ============================================================================
// SETTINGS
// ============================================================================

/// Which side of an ambiguous numeric date is the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    #[default]
    DayFirst,
    MonthFirst,
}

/// Heuristic data for the normalizer. Keyword lists are lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerSettings {
    pub date_order: DateOrder,
    pub self_transfer_keywords: Vec<String>,
    pub credit_keywords: Vec<String>,
    pub store_keywords: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        NormalizerSettings {
            date_order: DateOrder::DayFirst,
            self_transfer_keywords: owned(&[
                "self",
                "own account",
                "own a/c",
                "sweep in",
                "sweep out",
                "fd transfer",
                "transfer to fd",
            ]),
            credit_keywords: owned(&[
                "salary",
                "refund",
                "interest",
                "int.pd",
                "cashback",
                "reversal",
                "credited",
                "received",
                "deposit",
                "by transfer",
                "neft cr",
                "imps cr",
                "upi cr",
                "dividend",
            ]),
            store_keywords: owned(&[
                "store",
                "stores",
                "mart",
                "shop",
                "enterprises",
                "traders",
                "restaurant",
                "cafe",
                "foods",
                "pvt",
                "ltd",
                "limited",
                "llp",
                "supermarket",
                "pharmacy",
                "medical",
                "petroleum",
                "fuels",
                "amazon",
                "flipkart",
                "swiggy",
                "zomato",
            ]),
        }
    }
}

// ============================================================================
// DATES
// ============================================================================

/// Parse a date token: bank formats first, then the numeric day/month
/// heuristic. Two-digit years land in 20YY.
pub fn normalize_date(token: &str, formats: &[&str], order: DateOrder) -> Option<NaiveDate> {
    let token = token.trim();
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(token, format).ok())
        .and_then(widen_century)
        .or_else(|| numeric_date(token, order))
}

fn widen_century(date: NaiveDate) -> Option<NaiveDate> {
    if date.year() < 100 {
        date.with_year(2000 + date.year())
    } else {
        Some(date)
    }
}

fn numeric_date(token: &str, order: DateOrder) -> Option<NaiveDate> {
    let parts: Vec<&str> = token.split(['/', '-', '.']).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    let numbers: Vec<u32> = parts.iter().map(|p| p.parse().ok()).collect::<Option<_>>()?;

    if parts[0].len() == 4 {
        return NaiveDate::from_ymd_opt(numbers[0] as i32, numbers[1], numbers[2]);
    }

    let year = match parts[2].len() {
        2 => 2000 + numbers[2] as i32,
        4 => numbers[2] as i32,
        _ => return None,
    };
    let (mut day, mut month) = match order {
        DateOrder::DayFirst => (numbers[0], numbers[1]),
        DateOrder::MonthFirst => (numbers[1], numbers[0]),
    };
    if month > 12 && day <= 12 {
        std::mem::swap(&mut day, &mut month);
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBatch {
    pub records: Vec<ParsedTransactionRecord>,
    pub dropped_count: usize,
    pub filtered_count: usize,
    pub low_confidence_count: usize,
}

pub struct Normalizer<'a> {
    settings: &'a NormalizerSettings,
}

impl<'a> Normalizer<'a> {
    pub fn new(settings: &'a NormalizerSettings) -> Self {
        Normalizer { settings }
    }

    pub fn normalize(
        &self,
        parser: &dyn BankParser,
        groups: &[LineGroup],
        statement_account: Option<&str>,
        source_document_id: &str,
    ) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        let mut previous_balance: Option<f64> = None;

        for group in groups {
            let fields = match parser.extract_fields(group) {
                Some(fields) => fields,
                None => {
                    batch.dropped_count += 1;
                    continue;
                }
            };

            let date = normalize_date(&fields.date_token, parser.date_formats(), self.settings.date_order);
            let (debit, credit, guessed) =
                self.settle_direction(parser, &fields.description, &fields.amounts, previous_balance);
            previous_balance = match (fields.amounts.balance, previous_balance) {
                (Some(balance), _) => Some(balance),
                (None, Some(previous)) => Some(previous + credit - debit),
                (None, None) => None,
            };

            let date = match date {
                Some(date) => date,
                None => {
                    tracing::debug!(token = %fields.date_token, line = group.first_line, "dropping record with unparseable date");
                    batch.dropped_count += 1;
                    continue;
                }
            };

            let (debit, credit, netted) = net_both_sides(debit, credit);
            if debit == 0.0 && credit == 0.0 {
                tracing::debug!(line = group.first_line, "filtering record without amounts");
                batch.filtered_count += 1;
                continue;
            }

            let secondary = {
                let mut merged = extract_secondary(&fields.description, self.settings)
                    .merge(parser.narration_fields(&fields.description));
                merged.classify_counterparty(&self.settings.store_keywords);
                merged
            };

            let category = if self.is_self_transfer(&fields.description, secondary.account_number.as_deref(), statement_account) {
                FinancialCategory::Transfer
            } else if debit > 0.0 {
                FinancialCategory::Expense
            } else {
                FinancialCategory::Income
            };

            let low_confidence = fields.amounts.malformed || guessed || netted;
            if low_confidence {
                batch.low_confidence_count += 1;
            }

            batch.records.push(ParsedTransactionRecord {
                date: fields.date_token,
                date_iso: date.format("%Y-%m-%d").to_string(),
                description: fields.description,
                debit_amount: debit,
                credit_amount: credit,
                balance: fields.amounts.balance,
                financial_category: category,
                bank_code: parser.code().to_string(),
                transaction_id: secondary.transaction_id,
                account_number: secondary.account_number,
                transfer_type: secondary.transfer_type,
                upi_id: secondary.upi_id,
                person_name: secondary.person_name,
                branch: secondary.branch,
                store: secondary.store,
                commodity: secondary.commodity,
                raw_text: fields.raw_text,
                source_document_id: source_document_id.to_string(),
                low_confidence,
            });
        }

        batch
    }

    /// Returns (debit, credit, guessed). Order for an undirected amount:
    /// running-balance delta, bank narration convention, credit keywords,
    /// and finally debit.
    fn settle_direction(
        &self,
        parser: &dyn BankParser,
        description: &str,
        amounts: &RawAmounts,
        previous_balance: Option<f64>,
    ) -> (f64, f64, bool) {
        let amount = match amounts.undirected {
            Some(amount) => amount,
            None => return (amounts.debit, amounts.credit, false),
        };

        let from_balance = match (previous_balance, amounts.balance) {
            (Some(previous), Some(current)) => {
                let delta = current - previous;
                ((delta.abs() - amount).abs() < BALANCE_EPSILON).then(|| {
                    if delta >= 0.0 {
                        Direction::Credit
                    } else {
                        Direction::Debit
                    }
                })
            }
            _ => None,
        };

        let (direction, guessed) = match from_balance.or_else(|| parser.direction_hint(description)) {
            Some(direction) => (direction, false),
            None => {
                let lower = description.to_lowercase();
                if self.settings.credit_keywords.iter().any(|k| contains_phrase(&lower, k)) {
                    (Direction::Credit, parser.is_fallback())
                } else {
                    (Direction::Debit, true)
                }
            }
        };

        match direction {
            Direction::Credit => (amounts.debit, amounts.credit + amount, guessed),
            Direction::Debit => (amounts.debit + amount, amounts.credit, guessed),
        }
    }

    fn is_self_transfer(&self, description: &str, account: Option<&str>, statement_account: Option<&str>) -> bool {
        let lower = description.to_lowercase();
        if self.settings.self_transfer_keywords.iter().any(|k| contains_phrase(&lower, k)) {
            return true;
        }
        match (account, statement_account) {
            (Some(a), Some(b)) => same_account(a, b),
            _ => false,
        }
    }
}

/// Both sides positive: keep the net on one side
fn net_both_sides(debit: f64, credit: f64) -> (f64, f64, bool) {
    if debit > 0.0 && credit > 0.0 {
        let net = credit - debit;
        if net >= 0.0 {
            (0.0, net, true)
        } else {
            (-net, 0.0, true)
        }
    } else {
        (debit, credit, false)
    }
}

/// Masked numbers compare on their trailing digits
fn same_account(a: &str, b: &str) -> bool {
    let da: String = a.chars().filter(|c| c.is_ascii_digit()).collect();
    let db: String = b.chars().filter(|c| c.is_ascii_digit()).collect();
    let (short, long) = if da.len() <= db.len() { (&da, &db) } else { (&db, &da) };
    short.len() >= 4 && long.ends_with(short.as_str())
}
