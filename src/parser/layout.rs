// Line layout helpers shared by every bank strategy:
// anchor detection, trailing amount columns, noise lines.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Date token accepted at the start of an anchor line
const DATE_TOKEN: &str = r"(?:\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}|\d{4}-\d{2}-\d{2}|\d{1,2}[\s\-/]?(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*[\s\-/,]+\d{2,4})";

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)^\s*(?P<date>{d})(?:\s+(?P<value_date>{d}))?(?:\s|$)",
            d = DATE_TOKEN
        ))
        .expect("anchor regex")
    })
}

fn trailing_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"(?i)\s+{}\s*$", DATE_TOKEN)).expect("trailing date regex"))
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+").expect("token regex"))
}

fn amount_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?P<open>\()?(?P<sign>[-+])?(?:₹|rs\.?|inr)?(?P<sign2>[-+])?(?P<num>\d[\d,.]*\d|\d)(?P<close>\))?(?:\(?(?P<marker>cr|dr)\.?\)?)?$",
        )
        .expect("amount token regex")
    })
}

fn marker_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\(?(?P<marker>cr|dr)\.?\)?$").expect("marker regex"))
}

fn currency_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:₹|rs\.?|inr)$").expect("currency regex"))
}

fn page_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:page\s*(?:no\.?)?\s*:?\s*\d+(?:\s*(?:of|/)\s*\d+)?|\d+\s*/\s*\d+)$")
            .expect("page marker regex")
    })
}

// ============================================================================
// ANCHORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMatch<'a> {
    pub date: &'a str,
    pub value_date: Option<&'a str>,
    /// Text after the date token(s)
    pub rest: &'a str,
}

/// Match a date token at line start
pub fn match_anchor(line: &str) -> Option<AnchorMatch<'_>> {
    let caps = anchor_re().captures(line)?;
    let date = caps.name("date")?.as_str();
    let value_date = caps.name("value_date").map(|m| m.as_str());
    let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
    Some(AnchorMatch {
        date,
        value_date,
        rest: &line[end..],
    })
}

pub fn is_anchor_line(line: &str) -> bool {
    anchor_re().is_match(line)
}

/// Remove a value-date column that sits between narration and amounts
pub fn strip_trailing_date(body: &str) -> &str {
    match trailing_date_re().find(body) {
        Some(m) => &body[..m.start()],
        None => body,
    }
}

// ============================================================================
// AMOUNT COLUMNS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Debit,
    Credit,
}

/// How a bank prints its amount columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountLayout {
    /// Withdrawal | Deposit | Balance, blank column printed as "-" or nothing
    DebitCreditBalance,
    /// Amount followed by a Cr/Dr marker, then Balance
    AmountMarkerBalance,
    /// One signed amount (negative = debit), then Balance
    SignedAmountBalance,
}

/// One trailing amount column. `value` is None for a "-" placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountCell {
    pub value: Option<f64>,
    pub marker: Option<Direction>,
    /// Token looked like an amount but would not parse
    pub malformed: bool,
}

impl AmountCell {
    fn amount(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

enum Token {
    Amount(AmountCell),
    /// Amount printed without decimals; `grouped` when it carries a thousands comma
    Whole { cell: AmountCell, grouped: bool },
    Marker(Direction),
    Dash,
    Currency,
}

/// Longest whole number still read as an amount column
const MAX_WHOLE_DIGITS: usize = 9;

/// Debit, credit and balance
const MAX_WHOLE_COLUMNS: usize = 3;

fn parse_marker(s: &str) -> Option<Direction> {
    match s.to_ascii_lowercase().as_str() {
        "cr" => Some(Direction::Credit),
        "dr" => Some(Direction::Debit),
        _ => None,
    }
}

fn classify(token: &str) -> Option<Token> {
    if token.chars().all(|c| c == '-') {
        return Some(Token::Dash);
    }
    if currency_token_re().is_match(token) {
        return Some(Token::Currency);
    }
    if let Some(caps) = marker_token_re().captures(token) {
        return parse_marker(&caps["marker"]).map(Token::Marker);
    }
    let caps = amount_token_re().captures(token)?;
    let num = &caps["num"];
    let whole = !num.contains('.');
    if whole {
        let digits = num.chars().filter(|c| c.is_ascii_digit()).count();
        if digits > MAX_WHOLE_DIGITS || (num.starts_with('0') && num.len() > 1) {
            return None;
        }
    }
    let negative = caps.name("sign").map(|m| m.as_str() == "-").unwrap_or(false)
        || caps.name("sign2").map(|m| m.as_str() == "-").unwrap_or(false)
        || (caps.name("open").is_some() && caps.name("close").is_some());
    let (value, malformed) = match parse_amount(num) {
        Some(v) => (if negative { -v } else { v }, false),
        None => (0.0, true),
    };
    let cell = AmountCell {
        value: Some(value),
        marker: caps.name("marker").and_then(|m| parse_marker(m.as_str())),
        malformed,
    };
    if whole {
        Some(Token::Whole {
            cell,
            grouped: num.contains(','),
        })
    } else {
        Some(Token::Amount(cell))
    }
}

/// Whole numbers count as amount columns only in a run that prints no
/// decimals and shows column structure (a dash, a Cr/Dr marker or a
/// thousands comma). Otherwise they are reference numbers.
fn accepts_whole_numbers(run: &[Token]) -> bool {
    let has_decimal = run.iter().any(|t| matches!(t, Token::Amount(_)));
    let structured = run.iter().any(|t| match t {
        Token::Dash | Token::Marker(_) => true,
        Token::Whole { cell, grouped } => *grouped || cell.marker.is_some(),
        _ => false,
    });
    !has_decimal && structured
}

/// Strip thousands separators and currency symbols, then parse.
/// Blank and dash mean zero.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('₹')
        .replace("Rs.", "")
        .replace("INR", "")
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '₹'))
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '-') {
        return Some(0.0);
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split a line body into narration and its trailing amount columns
pub fn split_trailing_amounts(text: &str) -> (&str, Vec<AmountCell>) {
    let tokens: Vec<(usize, &str)> = token_re()
        .find_iter(text)
        .map(|m| (m.start(), m.as_str()))
        .collect();

    let mut run = Vec::new();
    while run.len() < tokens.len() {
        match classify(tokens[tokens.len() - 1 - run.len()].1) {
            Some(token) => run.push(token),
            None => break,
        }
    }

    // run is right to left; cut it at the first whole number it cannot take
    let whole_ok = accepts_whole_numbers(&run);
    let mut columns = 0;
    let mut taken = 0;
    for token in &run {
        match token {
            Token::Whole { grouped, .. } => {
                if !(whole_ok || *grouped) || columns >= MAX_WHOLE_COLUMNS {
                    break;
                }
                columns += 1;
            }
            Token::Amount(_) | Token::Dash => columns += 1,
            Token::Marker(_) | Token::Currency => {}
        }
        taken += 1;
    }
    run.truncate(taken);
    run.reverse();
    let cut = tokens.len() - taken;

    if !run
        .iter()
        .any(|t| matches!(t, Token::Amount(_) | Token::Whole { .. }))
    {
        return (text, Vec::new());
    }

    let mut cells: Vec<AmountCell> = Vec::new();
    for token in run {
        match token {
            Token::Amount(cell) | Token::Whole { cell, .. } => cells.push(cell),
            Token::Dash => cells.push(AmountCell {
                value: None,
                marker: None,
                malformed: false,
            }),
            Token::Marker(direction) => {
                if let Some(last) = cells.last_mut() {
                    last.marker = Some(direction);
                }
            }
            Token::Currency => {}
        }
    }

    let body_end = tokens.get(cut).map(|(start, _)| *start).unwrap_or(text.len());
    (&text[..body_end], cells)
}

/// Amounts of one transaction, before direction is settled
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawAmounts {
    pub debit: f64,
    pub credit: f64,
    /// Amount whose side the layout could not tell
    pub undirected: Option<f64>,
    pub balance: Option<f64>,
    pub malformed: bool,
}

impl RawAmounts {
    pub fn is_empty(&self) -> bool {
        self.debit == 0.0 && self.credit == 0.0 && self.undirected.unwrap_or(0.0) == 0.0
    }
}

/// Interpret trailing cells according to the bank's column layout.
/// With two or more cells, the last one is the running balance.
pub fn resolve_amounts(cells: &[AmountCell], layout: AmountLayout) -> RawAmounts {
    let mut out = RawAmounts {
        malformed: cells.iter().any(|c| c.malformed),
        ..RawAmounts::default()
    };
    if cells.is_empty() {
        return out;
    }

    let (txn, balance) = if cells.len() >= 2 {
        let last = cells[cells.len() - 1];
        let balance = last.value.map(|v| match last.marker {
            Some(Direction::Debit) => -v.abs(),
            _ => v,
        });
        (&cells[..cells.len() - 1], balance)
    } else {
        (cells, None)
    };
    out.balance = balance;

    if let Some(marked) = txn.iter().find(|c| c.marker.is_some()) {
        match marked.marker {
            Some(Direction::Credit) => out.credit = marked.amount().abs(),
            _ => out.debit = marked.amount().abs(),
        }
        return out;
    }

    match layout {
        AmountLayout::DebitCreditBalance if txn.len() >= 2 => {
            out.debit = txn[txn.len() - 2].amount().abs();
            out.credit = txn[txn.len() - 1].amount().abs();
        }
        AmountLayout::SignedAmountBalance => {
            let amount = txn[txn.len() - 1].amount();
            if amount < 0.0 {
                out.debit = -amount;
            } else {
                out.credit = amount;
            }
        }
        _ => {
            let amount = txn[txn.len() - 1].amount();
            if amount < 0.0 {
                out.debit = -amount;
            } else if amount > 0.0 {
                out.undirected = Some(amount);
            }
        }
    }
    out
}

// ============================================================================
// NOISE
// ============================================================================

const NOISE_PREFIXES: &[&str] = &[
    "opening balance",
    "closing balance",
    "balance b/f",
    "balance c/f",
    "brought forward",
    "carried forward",
    "statement summary",
    "this is a computer generated",
    "this is a system generated",
    "computer generated statement",
    "*** end of statement",
    "end of statement",
];

/// Page footers, column headers and balance summaries common to all banks
pub fn is_common_noise(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    if lower.is_empty() || page_marker_re().is_match(&lower) {
        return true;
    }
    // summary rows often still carry a date ("01/02/2024 OPENING BALANCE ...")
    let body = match match_anchor(&lower) {
        Some(anchor) => anchor.rest.trim_start().to_string(),
        None => lower.clone(),
    };
    if NOISE_PREFIXES.iter().any(|p| body.starts_with(p)) {
        return true;
    }
    is_column_header(&lower)
}

fn is_column_header(lower: &str) -> bool {
    let has_date = lower.contains("date");
    let has_column = ["balance", "narration", "particulars", "description", "withdrawal", "deposit"]
        .iter()
        .any(|c| lower.contains(c));
    has_date && has_column && split_trailing_amounts(lower).1.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_date_shapes() {
        for line in [
            "01/02/2024  SALARY",
            "1-2-24 ATM",
            "2024-02-01 NEFT",
            "01 Feb 2024 UPI",
            "01-FEB-2024 POS",
            "  05.03.2024 CHQ",
        ] {
            assert!(is_anchor_line(line), "should anchor: {}", line);
        }
        for line in ["UPI/1234/JOHN DOE/HDFC", "Page 1 of 3", "20245 units", "ref 01/02"] {
            assert!(!is_anchor_line(line), "should not anchor: {}", line);
        }
    }

    #[test]
    fn test_anchor_with_value_date() {
        let anchor = match_anchor("01/02/24  02/02/24  NEFT CR  500.00").unwrap();
        assert_eq!(anchor.date, "01/02/24");
        assert_eq!(anchor.value_date, Some("02/02/24"));
        assert_eq!(anchor.rest.trim_start(), "NEFT CR  500.00");
    }

    #[test]
    fn test_split_amount_marker_balance() {
        let (body, cells) = split_trailing_amounts("SALARY CREDIT XYZ CORP  50000.00  Cr  150000.00");
        assert_eq!(body.trim(), "SALARY CREDIT XYZ CORP");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].value, Some(50000.0));
        assert_eq!(cells[0].marker, Some(Direction::Credit));
        assert_eq!(cells[1].value, Some(150000.0));
    }

    #[test]
    fn test_split_fused_currency_and_markers() {
        let (body, cells) = split_trailing_amounts("POS AMAZON ₹1,200.50 Rs. 9,800.00Cr");
        assert_eq!(body.trim(), "POS AMAZON");
        assert_eq!(cells[0].value, Some(1200.5));
        assert_eq!(cells[1].value, Some(9800.0));
        assert_eq!(cells[1].marker, Some(Direction::Credit));

        let (_, cells) = split_trailing_amounts("CHQ 500.00(Dr) 1,00,000.00(Cr)");
        assert_eq!(cells[0].marker, Some(Direction::Debit));
        assert_eq!(cells[1].value, Some(100000.0));
    }

    #[test]
    fn test_split_keeps_reference_numbers_in_body() {
        let (body, cells) = split_trailing_amounts("UPI 412345678901");
        assert_eq!(body, "UPI 412345678901");
        assert!(cells.is_empty());
    }

    #[test]
    fn test_split_whole_number_columns() {
        let (body, cells) = split_trailing_amounts("ATM WDL MG ROAD  500  -  9500");
        assert_eq!(body.trim(), "ATM WDL MG ROAD");
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].value, Some(500.0));
        assert_eq!(cells[2].value, Some(9500.0));

        let (body, cells) = split_trailing_amounts("SALARY  25,000 Cr  1,25,000 Cr");
        assert_eq!(body.trim(), "SALARY");
        assert_eq!(cells[0].value, Some(25000.0));
        assert_eq!(cells[0].marker, Some(Direction::Credit));
        assert_eq!(cells[1].value, Some(125000.0));

        // at most three columns: the cheque number stays in the narration
        let (body, cells) = split_trailing_amounts("CHQ 123456  5000  -  45000");
        assert_eq!(body.trim(), "CHQ 123456");
        assert_eq!(cells.len(), 3);
    }

    #[test]
    fn test_split_whole_numbers_beside_decimals_are_references() {
        let (body, cells) = split_trailing_amounts("NEFT 123456 500.00 9500.00");
        assert_eq!(body.trim(), "NEFT 123456");
        assert_eq!(cells.len(), 2);

        // no column structure: still a reference
        let (body, cells) = split_trailing_amounts("IMPS 412345 500");
        assert_eq!(body, "IMPS 412345 500");
        assert!(cells.is_empty());
    }

    #[test]
    fn test_split_dash_placeholders() {
        let (_, cells) = split_trailing_amounts("ATM WDL  500.00  -  1500.00");
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[1].value, None);
    }

    #[test]
    fn test_malformed_amount_is_flagged() {
        let (_, cells) = split_trailing_amounts("MISC 1.00.00 200.00");
        assert!(cells[0].malformed);
        assert_eq!(cells[0].value, Some(0.0));
        let amounts = resolve_amounts(&cells, AmountLayout::DebitCreditBalance);
        assert!(amounts.malformed);
    }

    #[test]
    fn test_resolve_debit_credit_balance() {
        let (_, cells) = split_trailing_amounts("ATM WDL  500.00  -  1500.00");
        let amounts = resolve_amounts(&cells, AmountLayout::DebitCreditBalance);
        assert_eq!(amounts.debit, 500.0);
        assert_eq!(amounts.credit, 0.0);
        assert_eq!(amounts.balance, Some(1500.0));
        assert_eq!(amounts.undirected, None);
    }

    #[test]
    fn test_resolve_two_cells_is_undirected() {
        let (_, cells) = split_trailing_amounts("TRANSFER 250.00 1000.00");
        let amounts = resolve_amounts(&cells, AmountLayout::DebitCreditBalance);
        assert_eq!(amounts.undirected, Some(250.0));
        assert_eq!(amounts.balance, Some(1000.0));
    }

    #[test]
    fn test_resolve_signed_layout() {
        let (_, cells) = split_trailing_amounts("UPI PAYMENT -200.00 800.00");
        let amounts = resolve_amounts(&cells, AmountLayout::SignedAmountBalance);
        assert_eq!(amounts.debit, 200.0);

        let (_, cells) = split_trailing_amounts("UPI RECEIVED +300.00 1100.00");
        let amounts = resolve_amounts(&cells, AmountLayout::SignedAmountBalance);
        assert_eq!(amounts.credit, 300.0);
    }

    #[test]
    fn test_overdrawn_balance_is_negative() {
        let (_, cells) = split_trailing_amounts("CHARGES 50.00 Dr 120.00 Dr");
        let amounts = resolve_amounts(&cells, AmountLayout::AmountMarkerBalance);
        assert_eq!(amounts.debit, 50.0);
        assert_eq!(amounts.balance, Some(-120.0));
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("1,50,000.00"), Some(150000.0));
        assert_eq!(parse_amount("₹99.50"), Some(99.5));
        assert_eq!(parse_amount(""), Some(0.0));
        assert_eq!(parse_amount("-"), Some(0.0));
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn test_common_noise() {
        assert!(is_common_noise("Page 2 of 5"));
        assert!(is_common_noise("  3/7 "));
        assert!(is_common_noise("01/02/2024 OPENING BALANCE 1000.00"));
        assert!(is_common_noise("Date  Narration  Chq/Ref No  Withdrawal  Deposit  Balance"));
        assert!(!is_common_noise("01/02/2024 UPI/1234/JOHN DOE 500.00 1000.00"));
        assert!(!is_common_noise("UPI/1234/JOHN DOE/HDFC"));
    }
}
