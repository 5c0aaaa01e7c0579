// Secondary field extraction from narration text
//
// Indian statements pack counterparty details into the description:
//   UPI/412345678901/JOHN DOE/HDFC
//   TO TRANSFER-UPI/DR/412345678901/JOHN DOE/SBIN/john@oksbi/Payment
//   NEFT CR-SBIN0000123-ACME CORP-PAYROLL
//   POS 4111XXXXXXXX1111 AMAZON RETAIL
// The segments after the transfer keyword are classified one by one.

use crate::normalizer::NormalizerSettings;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryFields {
    pub transaction_id: Option<String>,
    pub account_number: Option<String>,
    pub transfer_type: Option<String>,
    pub upi_id: Option<String>,
    pub person_name: Option<String>,
    pub branch: Option<String>,
    pub store: Option<String>,
    pub commodity: Option<String>,
}

impl SecondaryFields {
    /// Fill-in merge: every field set in `preferred` wins.
    /// A store in `preferred` also claims the same name read here as a person.
    pub fn merge(self, preferred: SecondaryFields) -> SecondaryFields {
        let claimed = preferred.person_name.is_none()
            && preferred.store.is_some()
            && self.person_name == preferred.store;
        SecondaryFields {
            transaction_id: preferred.transaction_id.or(self.transaction_id),
            account_number: preferred.account_number.or(self.account_number),
            transfer_type: preferred.transfer_type.or(self.transfer_type),
            upi_id: preferred.upi_id.or(self.upi_id),
            person_name: if claimed {
                None
            } else {
                preferred.person_name.or(self.person_name)
            },
            branch: preferred.branch.or(self.branch),
            store: preferred.store.or(self.store),
            commodity: preferred.commodity.or(self.commodity),
        }
    }

    /// Move a counterparty that looks like a business from person to store
    pub fn classify_counterparty(&mut self, store_keywords: &[String]) {
        if self.store.is_some() {
            return;
        }
        let is_store = self
            .person_name
            .as_deref()
            .map(|name| {
                let lower = name.to_lowercase();
                store_keywords.iter().any(|k| contains_phrase(&lower, k))
            })
            .unwrap_or(false);
        if is_store {
            self.store = self.person_name.take();
        }
    }
}

/// Bank short names and IFSC prefixes that show up as narration segments
const BANK_SEGMENTS: &[&str] = &[
    "HDFC", "HDFC BANK", "SBIN", "SBI", "STATE BANK OF INDIA", "ICIC", "ICICI", "ICICI BANK", "UTIB",
    "AXIS", "AXIS BANK", "KKBK", "KOTAK", "KOTAK MAHINDRA BANK", "YESB", "YES BANK", "IDIB",
    "INDIAN BANK", "JIOP", "JIO PAYMENTS BANK", "PYTM", "PAYTM", "PAYTM PAYMENTS BANK", "BARB",
    "PUNB", "CNRB", "UBIN", "IDFB", "INDB", "FDRL", "AIRP",
];

/// Direction and flow markers, never a name
const MARKER_SEGMENTS: &[&str] = &["DR", "CR", "P2A", "P2M", "P2P", "REV", "RRN", "NA"];

fn transfer_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(UPI|NEFT|IMPS|RTGS|NACH|ACH|ECS|ATM|POS|CHQ|CHEQUE|CASH)\b")
            .expect("transfer type regex")
    })
}

fn upi_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w.\-]+@[A-Za-z][A-Za-z0-9]*").expect("upi id regex"))
}

fn ifsc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]{4}0[A-Za-z0-9]{6}$").expect("ifsc regex"))
}

fn account_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\ba/c|\bacct?|\baccount)\s*(?:no\.?)?\s*[:.\-]?\s*([x*\d]{4,20})\b|\b([x*]{2,}\d{3,6})\b")
            .expect("account regex")
    })
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:ref(?:\s*no)?|txn(?:\s*id)?|utr|rrn|chq(?:\s*no)?)\s*[.:#\-]?\s*([A-Z0-9]*\d[A-Z0-9]{3,})\b")
            .expect("reference regex")
    })
}

fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:branch|br)\s*[:\-]\s*([A-Za-z][A-Za-z .]*[A-Za-z])").expect("branch regex")
    })
}

/// Word-bounded, case-sensitive phrase search. Callers lowercase both sides.
pub(crate) fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    haystack.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        before_ok && after_ok
    })
}

fn is_bank_segment(segment: &str) -> bool {
    let upper = segment.to_ascii_uppercase();
    BANK_SEGMENTS.contains(&upper.as_str()) || ifsc_re().is_match(segment)
}

fn is_marker_segment(segment: &str) -> bool {
    MARKER_SEGMENTS.contains(&segment.to_ascii_uppercase().as_str())
}

fn has_letters(segment: &str) -> bool {
    segment.chars().any(|c| c.is_alphabetic())
}

fn digit_count(segment: &str) -> usize {
    segment.chars().filter(|c| c.is_ascii_digit()).count()
}

/// Pull every secondary field the narration carries
pub fn extract_secondary(description: &str, settings: &NormalizerSettings) -> SecondaryFields {
    let mut fields = SecondaryFields::default();

    let keyword = transfer_type_re().captures(description).and_then(|c| c.get(1));
    if let Some(m) = keyword {
        let kind = m.as_str().to_ascii_uppercase();
        fields.transfer_type = Some(if kind == "CHEQUE" { "CHQ".to_string() } else { kind.clone() });
        match kind.as_str() {
            "POS" => fields.store = pos_merchant(&description[m.end()..]),
            "UPI" | "NEFT" | "IMPS" | "RTGS" | "NACH" | "ACH" | "ECS" => {
                read_segments(&description[m.end()..], &mut fields)
            }
            _ => {}
        }
    }

    if fields.upi_id.is_none() {
        fields.upi_id = upi_id_re().find(description).map(|m| m.as_str().to_string());
    }
    if fields.transaction_id.is_none() {
        fields.transaction_id = reference_re()
            .captures(description)
            .map(|c| c[1].to_uppercase());
    }
    if fields.account_number.is_none() {
        fields.account_number = account_re().captures(description).and_then(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .filter(|m| digit_count(m.as_str()) >= 3)
                .map(|m| m.as_str().to_uppercase())
        });
    }
    fields.branch = branch_re()
        .captures(description)
        .map(|c| c[1].trim().to_string());

    fields.classify_counterparty(&settings.store_keywords);
    fields
}

/// The delimiter must follow the keyword directly, or after a CR/DR word
fn segment_delimiter(rest: &str) -> Option<char> {
    let rest = rest.trim_start();
    let rest = match rest.get(..2) {
        Some(word) if is_marker_segment(word) => rest[2..].trim_start(),
        _ => rest,
    };
    rest.chars().next().filter(|c| matches!(c, '/' | ':' | '-' | '*'))
}

/// Classify delimiter-separated segments following a transfer keyword
fn read_segments(rest: &str, fields: &mut SecondaryFields) {
    let delimiter = match segment_delimiter(rest) {
        Some(d) => d,
        None => return,
    };
    let mut merchant_flow = false;
    let mut longest_number: Option<&str> = None;

    for segment in rest.split(delimiter).map(str::trim).filter(|s| !s.is_empty()) {
        if segment.eq_ignore_ascii_case("P2M") {
            merchant_flow = true;
            continue;
        }
        if is_marker_segment(segment) || is_bank_segment(segment) {
            continue;
        }
        if upi_id_re().is_match(segment) {
            if fields.upi_id.is_none() {
                fields.upi_id = Some(segment.to_string());
            }
            continue;
        }
        if !has_letters(segment) {
            let digits = digit_count(segment);
            if digits >= 4 && digits > longest_number.map(digit_count).unwrap_or(0) {
                longest_number = Some(segment);
            }
            continue;
        }
        // masked account like XXXXXX1234
        if segment.chars().all(|c| matches!(c, 'X' | 'x' | '*' | '0'..='9')) && digit_count(segment) >= 3 {
            if fields.account_number.is_none() {
                fields.account_number = Some(segment.to_uppercase());
            }
            continue;
        }
        // reference codes like N034240123456
        if digit_count(segment) >= 6 && !segment.contains(' ') {
            if fields.transaction_id.is_none() {
                fields.transaction_id = Some(segment.to_string());
            }
            continue;
        }

        if fields.person_name.is_none() && fields.store.is_none() {
            if merchant_flow {
                fields.store = Some(segment.to_string());
            } else {
                fields.person_name = Some(segment.to_string());
            }
        } else if fields.commodity.is_none() {
            fields.commodity = Some(segment.to_string());
        }
    }

    if fields.transaction_id.is_none() {
        fields.transaction_id = longest_number.map(|s| s.to_string());
    }
}

/// Words after the card number up to the next token with digits
fn pos_merchant(rest: &str) -> Option<String> {
    let words: Vec<&str> = rest
        .split_whitespace()
        .skip_while(|w| w.chars().any(|c| c.is_ascii_digit()) || !has_letters(w))
        .take_while(|w| !w.chars().any(|c| c.is_ascii_digit()))
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(description: &str) -> SecondaryFields {
        extract_secondary(description, &NormalizerSettings::default())
    }

    #[test]
    fn test_upi_slash_narration() {
        let fields = extract("TRANSFER TO UPI/1234/JOHN DOE/HDFC");
        assert_eq!(fields.transfer_type.as_deref(), Some("UPI"));
        assert_eq!(fields.person_name.as_deref(), Some("JOHN DOE"));
        assert_eq!(fields.transaction_id.as_deref(), Some("1234"));
        assert_eq!(fields.commodity, None);
    }

    #[test]
    fn test_sbi_upi_narration() {
        let fields = extract("TO TRANSFER-UPI/DR/412345678901/JOHN DOE/SBIN/john@oksbi/Payment");
        assert_eq!(fields.person_name.as_deref(), Some("JOHN DOE"));
        assert_eq!(fields.transaction_id.as_deref(), Some("412345678901"));
        assert_eq!(fields.upi_id.as_deref(), Some("john@oksbi"));
        assert_eq!(fields.commodity.as_deref(), Some("Payment"));
    }

    #[test]
    fn test_p2m_marks_a_store() {
        let fields = extract("UPI/P2M/412345678901/SWIGGY/YESB/food order");
        assert_eq!(fields.store.as_deref(), Some("SWIGGY"));
        assert_eq!(fields.person_name, None);
        assert_eq!(fields.commodity.as_deref(), Some("food order"));
    }

    #[test]
    fn test_store_keywords_reclassify_person() {
        let fields = extract("UPI/412345678901/SHARMA GENERAL STORE/ICIC");
        assert_eq!(fields.store.as_deref(), Some("SHARMA GENERAL STORE"));
        assert_eq!(fields.person_name, None);
    }

    #[test]
    fn test_neft_hyphen_narration() {
        let fields = extract("NEFT CR-SBIN0000123-ACME CORP-PAYROLL");
        assert_eq!(fields.transfer_type.as_deref(), Some("NEFT"));
        assert_eq!(fields.person_name.as_deref(), Some("ACME CORP"));
        assert_eq!(fields.commodity.as_deref(), Some("PAYROLL"));
    }

    #[test]
    fn test_pos_merchant() {
        let fields = extract("POS 4111XXXXXXXX1111 AMAZON RETAIL 05/03");
        assert_eq!(fields.transfer_type.as_deref(), Some("POS"));
        assert_eq!(fields.store.as_deref(), Some("AMAZON RETAIL"));
    }

    #[test]
    fn test_reference_account_and_branch() {
        let fields = extract("CASH DEPOSIT REF NO 998877 A/C XXXX5678 BRANCH: ANNA NAGAR");
        assert_eq!(fields.transaction_id.as_deref(), Some("998877"));
        assert_eq!(fields.account_number.as_deref(), Some("XXXX5678"));
        assert_eq!(fields.branch.as_deref(), Some("ANNA NAGAR"));
    }

    #[test]
    fn test_plain_narration_has_no_fields() {
        let fields = extract("INTEREST CREDITED");
        assert_eq!(fields, SecondaryFields::default());
    }

    #[test]
    fn test_merge_prefers_override() {
        let generic = SecondaryFields {
            person_name: Some("JOHN".to_string()),
            branch: Some("MG ROAD".to_string()),
            ..SecondaryFields::default()
        };
        let bank = SecondaryFields {
            person_name: Some("JOHN DOE".to_string()),
            ..SecondaryFields::default()
        };
        let merged = generic.merge(bank);
        assert_eq!(merged.person_name.as_deref(), Some("JOHN DOE"));
        assert_eq!(merged.branch.as_deref(), Some("MG ROAD"));
    }

    #[test]
    fn test_contains_phrase_respects_word_boundaries() {
        assert!(contains_phrase("transfer to self", "self"));
        assert!(!contains_phrase("myself", "self"));
        assert!(contains_phrase("own account transfer", "own account"));
    }
}
