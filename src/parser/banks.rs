// Bundled bank strategies
//
// Each strategy only states what is particular to its bank: header
// signature, date formats, amount column layout and narration conventions.
// Line grouping and column cutting come from the trait defaults.

use super::layout::{AmountLayout, Direction};
use super::{preamble_mentions, BankParser};
use crate::fields::SecondaryFields;
use crate::loader::ExtractedDocument;

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn looks_like_reference(s: &str) -> bool {
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 6 && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// A standalone "CR" or "DR" segment in a slash-separated narration
fn segment_direction(description: &str) -> Option<Direction> {
    description.split('/').find_map(|part| match part.trim().to_ascii_uppercase().as_str() {
        "CR" => Some(Direction::Credit),
        "DR" => Some(Direction::Debit),
        _ => None,
    })
}

// ============================================================================
// STATE BANK OF INDIA
// ============================================================================

/// SBI: "BY TRANSFER" / "TO TRANSFER" narration prefixes carry the direction
pub struct SbiParser;

impl SbiParser {
    pub fn new() -> Self {
        SbiParser
    }
}

impl BankParser for SbiParser {
    fn code(&self) -> &'static str {
        "SBIN"
    }

    fn name(&self) -> &'static str {
        "State Bank of India"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["state bank of india", "sbin0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d %b %Y", "%d-%b-%Y", "%d/%m/%Y", "%d-%m-%Y", "%d %b %y"]
    }

    fn direction_hint(&self, description: &str) -> Option<Direction> {
        let upper = description.to_ascii_uppercase();
        if upper.starts_with("BY ") || upper.contains("DEP TFR") {
            Some(Direction::Credit)
        } else if upper.starts_with("TO ") || upper.contains("WDL TFR") {
            Some(Direction::Debit)
        } else {
            None
        }
    }
}

// ============================================================================
// INDIAN BANK
// ============================================================================

/// Indian Bank: "BY CASH" / "BY CLG" credits, "TO CLG" / "CASH WDL" debits,
/// and UPI narrations with a CR/DR segment (`UPI/412345678901/CR/NAME/BANK/vpa`)
pub struct IndianBankParser;

impl IndianBankParser {
    pub fn new() -> Self {
        IndianBankParser
    }
}

impl BankParser for IndianBankParser {
    fn code(&self) -> &'static str {
        "IDIB"
    }

    fn name(&self) -> &'static str {
        "Indian Bank"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["indian bank", "idib0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d/%m/%Y", "%d-%m-%Y", "%d %b %Y", "%d-%b-%Y"]
    }

    fn direction_hint(&self, description: &str) -> Option<Direction> {
        let upper = description.trim().to_ascii_uppercase();
        if let Some(direction) = segment_direction(&upper) {
            return Some(direction);
        }
        if upper.starts_with("BY ") || upper.starts_with("CREDIT INT") {
            Some(Direction::Credit)
        } else if upper.starts_with("TO ") || upper.contains("CASH WDL") || upper.starts_with("CHRGS") {
            Some(Direction::Debit)
        } else {
            None
        }
    }
}

// ============================================================================
// KOTAK MAHINDRA BANK
// ============================================================================

/// Kotak prints one amount column with a Cr/Dr marker
pub struct KotakParser;

impl KotakParser {
    pub fn new() -> Self {
        KotakParser
    }
}

impl BankParser for KotakParser {
    fn code(&self) -> &'static str {
        "KKBK"
    }

    fn name(&self) -> &'static str {
        "Kotak Mahindra Bank"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["kotak mahindra bank", "kkbk0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d-%m-%Y", "%d/%m/%Y", "%d %b %Y", "%d-%b-%y"]
    }

    fn amount_layout(&self) -> AmountLayout {
        AmountLayout::AmountMarkerBalance
    }
}

// ============================================================================
// HDFC BANK
// ============================================================================

/// HDFC: two-digit years and hyphen-separated narrations
///
/// - `UPI-NAME-VPA-IFSC-REF-REMARK`
/// - `NEFT CR-IFSC-NAME-REMARK-REF`
/// - `IMPS-REF-NAME-BANK-ACCOUNT-REMARK`
pub struct HdfcParser;

impl HdfcParser {
    pub fn new() -> Self {
        HdfcParser
    }
}

impl BankParser for HdfcParser {
    fn code(&self) -> &'static str {
        "HDFC"
    }

    fn name(&self) -> &'static str {
        "HDFC Bank"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["hdfc bank", "hdfc0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d/%m/%y", "%d/%m/%Y", "%d-%m-%Y"]
    }

    fn narration_fields(&self, description: &str) -> SecondaryFields {
        let parts: Vec<&str> = description.split('-').map(str::trim).collect();
        let head = parts.first().map(|p| p.to_ascii_uppercase()).unwrap_or_default();

        if head == "UPI" && parts.len() >= 5 {
            return SecondaryFields {
                transfer_type: Some("UPI".to_string()),
                person_name: non_empty(parts[1]),
                upi_id: parts.get(2).filter(|p| p.contains('@')).map(|p| p.to_string()),
                transaction_id: parts.get(4).filter(|p| looks_like_reference(p)).map(|p| p.to_string()),
                commodity: non_empty(&parts.get(5..).unwrap_or(&[]).join("-")),
                ..SecondaryFields::default()
            };
        }

        if (head.starts_with("NEFT") || head.starts_with("RTGS")) && parts.len() >= 3 {
            let last = parts.len() - 1;
            let reference = (last >= 3 && looks_like_reference(parts[last])).then(|| parts[last].to_string());
            let remark_end = if reference.is_some() { last } else { parts.len() };
            return SecondaryFields {
                transfer_type: Some(head[..4].to_string()),
                person_name: non_empty(parts[2]),
                transaction_id: reference,
                commodity: non_empty(&parts.get(3..remark_end).unwrap_or(&[]).join("-")),
                ..SecondaryFields::default()
            };
        }

        if head == "IMPS" && parts.len() >= 3 {
            return SecondaryFields {
                transfer_type: Some("IMPS".to_string()),
                transaction_id: parts.get(1).filter(|p| looks_like_reference(p)).map(|p| p.to_string()),
                person_name: non_empty(parts[2]),
                account_number: parts
                    .get(4)
                    .filter(|p| p.chars().any(|c| c.is_ascii_digit()))
                    .map(|p| p.to_string()),
                commodity: non_empty(&parts.get(5..).unwrap_or(&[]).join("-")),
                ..SecondaryFields::default()
            };
        }

        SecondaryFields::default()
    }
}

// ============================================================================
// YES BANK
// ============================================================================

/// Yes Bank: "CR-" / "DR-" narration prefixes, or a CR/DR segment in
/// `UPI/DR/412345678901/NAME/BANK/vpa/REMARK`
pub struct YesBankParser;

impl YesBankParser {
    pub fn new() -> Self {
        YesBankParser
    }
}

impl BankParser for YesBankParser {
    fn code(&self) -> &'static str {
        "YESB"
    }

    fn name(&self) -> &'static str {
        "Yes Bank"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["yes bank", "yesb0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d/%m/%Y", "%d-%b-%Y", "%d %b %Y", "%d-%m-%Y"]
    }

    fn direction_hint(&self, description: &str) -> Option<Direction> {
        let upper = description.trim().to_ascii_uppercase();
        if upper.starts_with("CR-") {
            Some(Direction::Credit)
        } else if upper.starts_with("DR-") {
            Some(Direction::Debit)
        } else {
            segment_direction(&upper)
        }
    }
}

// ============================================================================
// AXIS BANK
// ============================================================================

/// Axis: slash-separated narrations with a payment mode after the channel
///
/// - `UPI/P2A/REF/NAME/REMARK/BANK` pays a person
/// - `UPI/P2M/REF/MERCHANT/REMARK/BANK` pays a merchant
/// - `NEFT/REF/NAME/REMARK`
pub struct AxisParser;

impl AxisParser {
    pub fn new() -> Self {
        AxisParser
    }
}

impl BankParser for AxisParser {
    fn code(&self) -> &'static str {
        "UTIB"
    }

    fn name(&self) -> &'static str {
        "Axis Bank"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["axis bank", "utib0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y"]
    }

    fn narration_fields(&self, description: &str) -> SecondaryFields {
        let parts: Vec<&str> = description.split('/').map(str::trim).collect();
        let head = parts.first().map(|p| p.to_ascii_uppercase()).unwrap_or_default();
        let mode = parts.get(1).map(|p| p.to_ascii_uppercase()).unwrap_or_default();

        if (head == "UPI" || head == "IMPS") && (mode == "P2A" || mode == "P2M") && parts.len() >= 4 {
            let counterparty = non_empty(parts[3]);
            let (person_name, store) = if mode == "P2M" {
                (None, counterparty)
            } else {
                (counterparty, None)
            };
            return SecondaryFields {
                transfer_type: Some(head),
                transaction_id: parts.get(2).filter(|p| looks_like_reference(p)).map(|p| p.to_string()),
                person_name,
                store,
                commodity: parts.get(4).and_then(|p| non_empty(p)),
                ..SecondaryFields::default()
            };
        }

        if (head == "NEFT" || head == "RTGS") && parts.len() >= 3 {
            return SecondaryFields {
                transfer_type: Some(head),
                transaction_id: parts.get(1).filter(|p| looks_like_reference(p)).map(|p| p.to_string()),
                person_name: non_empty(parts[2]),
                commodity: non_empty(&parts.get(3..).unwrap_or(&[]).join("/")),
                ..SecondaryFields::default()
            };
        }

        SecondaryFields::default()
    }
}

// ============================================================================
// JIO PAYMENTS BANK
// ============================================================================

/// Jio prints a single signed amount column (negative = debit)
pub struct JioPaymentsParser;

impl JioPaymentsParser {
    pub fn new() -> Self {
        JioPaymentsParser
    }
}

impl BankParser for JioPaymentsParser {
    fn code(&self) -> &'static str {
        "JIOP"
    }

    fn name(&self) -> &'static str {
        "Jio Payments Bank"
    }

    fn matches(&self, document: &ExtractedDocument) -> bool {
        preamble_mentions(document, &["jio payments bank", "jiop0"])
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &["%d %b %Y", "%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y"]
    }

    fn amount_layout(&self) -> AmountLayout {
        AmountLayout::SignedAmountBalance
    }
}

// ============================================================================
// GENERIC FALLBACK
// ============================================================================

/// Matches anything. Tries every common date format.
pub struct GenericParser;

impl GenericParser {
    pub fn new() -> Self {
        GenericParser
    }
}

impl BankParser for GenericParser {
    fn code(&self) -> &'static str {
        "GENERIC"
    }

    fn name(&self) -> &'static str {
        "Generic statement"
    }

    fn matches(&self, _document: &ExtractedDocument) -> bool {
        true
    }

    fn is_fallback(&self) -> bool {
        true
    }

    fn date_formats(&self) -> &'static [&'static str] {
        &[
            "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d %b %Y", "%d-%b-%Y", "%d %B %Y",
            "%d/%m/%y", "%d-%m-%y", "%d-%b-%y", "%d %b %y",
        ]
    }
}
