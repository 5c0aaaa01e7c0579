// Bank-Specific Statement Parser
// Registry of per-bank strategies behind one BankParser trait
//
// Adding a bank = writing a new strategy and registering it. The pipeline only
// talks to `dyn BankParser` and never branches on which bank it is.

pub mod banks;
pub mod layout;

use crate::buffer::{group_lines, LineGroup};
use crate::fields::SecondaryFields;
use crate::loader::ExtractedDocument;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

pub use banks::{
    AxisParser, GenericParser, HdfcParser, IndianBankParser, JioPaymentsParser, KotakParser,
    SbiParser, YesBankParser,
};
pub use layout::{AmountLayout, Direction, RawAmounts};

/// How many lines of preamble are searched for a bank signature
const PREAMBLE_LINES: usize = 40;

// ============================================================================
// RAW FIELDS
// ============================================================================

/// Fields cut out of one line group by a bank strategy, still unvalidated
#[derive(Debug, Clone, PartialEq)]
pub struct RawFields {
    pub date_token: String,
    pub value_date_token: Option<String>,
    pub description: String,
    pub amounts: RawAmounts,
    pub raw_text: String,
}

// ============================================================================
// CORE TRAIT
// ============================================================================

/// BankParser - one strategy per bank layout
pub trait BankParser: Send + Sync {
    /// Short bank code (IFSC prefix), e.g. "HDFC"
    fn code(&self) -> &'static str;

    /// Human-readable name for display
    fn name(&self) -> &'static str;

    /// Header/column signature test
    fn matches(&self, document: &ExtractedDocument) -> bool;

    /// chrono formats this bank prints dates in, most common first
    fn date_formats(&self) -> &'static [&'static str];

    fn amount_layout(&self) -> AmountLayout {
        AmountLayout::DebitCreditBalance
    }

    /// True for the catch-all strategy. Its direction guesses are low-confidence.
    fn is_fallback(&self) -> bool {
        false
    }

    fn is_anchor(&self, line: &str) -> bool {
        layout::is_anchor_line(line)
    }

    fn is_noise(&self, line: &str) -> bool {
        layout::is_common_noise(line)
    }

    /// Split the document into one line group per candidate transaction.
    /// Page headers repeating the preamble are noise, not continuation.
    fn parse(&self, document: &ExtractedDocument) -> Vec<LineGroup> {
        let header = page_header_lines(document);
        group_lines(
            &document.lines,
            |l| self.is_anchor(l),
            |l| self.is_noise(l) || header.contains(&header_key(l)),
        )
    }

    /// Cut date, narration and amount columns out of a line group
    fn extract_fields(&self, group: &LineGroup) -> Option<RawFields> {
        extract_columns(group, self.amount_layout())
    }

    /// Narration conventions that tell debit from credit (e.g. "BY TRANSFER")
    fn direction_hint(&self, _description: &str) -> Option<Direction> {
        None
    }

    /// Bank-specific narration parsing; merged over the generic extraction
    fn narration_fields(&self, _description: &str) -> SecondaryFields {
        SecondaryFields::default()
    }

    /// Account number printed in the statement header
    fn statement_account(&self, document: &ExtractedDocument) -> Option<String> {
        find_statement_account(&preamble(document))
    }
}

// ============================================================================
// SHARED EXTRACTION
// ============================================================================

/// Default column extraction: anchor date, narration, trailing amounts.
///
/// If the anchor line carries no amounts, the first continuation line that
/// does supplies them (some banks wrap the narration above the figures).
pub fn extract_columns(group: &LineGroup, amount_layout: AmountLayout) -> Option<RawFields> {
    let anchor = layout::match_anchor(group.anchor())?;
    let (body, mut cells) = layout::split_trailing_amounts(anchor.rest);

    let mut parts: Vec<String> = vec![layout::strip_trailing_date(body).trim().to_string()];
    for line in group.continuation() {
        if cells.is_empty() {
            let (cont_body, cont_cells) = layout::split_trailing_amounts(line);
            if !cont_cells.is_empty() {
                cells = cont_cells;
                parts.push(layout::strip_trailing_date(cont_body).trim().to_string());
                continue;
            }
        }
        parts.push(line.trim().to_string());
    }

    let description = parts
        .iter()
        .filter(|p| !p.is_empty())
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");

    Some(RawFields {
        date_token: anchor.date.trim().to_string(),
        value_date_token: anchor.value_date.map(|d| d.trim().to_string()),
        description,
        amounts: layout::resolve_amounts(&cells, amount_layout),
        raw_text: group.raw_text(),
    })
}

/// Lines before the first anchor (capped), lowercased
pub fn preamble(document: &ExtractedDocument) -> String {
    document
        .lines
        .iter()
        .take(PREAMBLE_LINES)
        .take_while(|l| !layout::is_anchor_line(&l.text))
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase()
}

fn header_key(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Preamble lines as whitespace-collapsed lowercase keys. Multi-page
/// statements reprint them at the top of every page.
pub fn page_header_lines(document: &ExtractedDocument) -> HashSet<String> {
    document
        .lines
        .iter()
        .take(PREAMBLE_LINES)
        .take_while(|l| !layout::is_anchor_line(&l.text))
        .map(|l| header_key(&l.text))
        .filter(|k| !k.is_empty())
        .collect()
}

/// Signature test shared by the bank strategies: bank name or IFSC prefix in
/// the preamble.
pub fn preamble_mentions(document: &ExtractedDocument, needles: &[&str]) -> bool {
    let head = preamble(document);
    needles.iter().any(|n| head.contains(n))
}

fn statement_account_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:account|a/c|acct)\s*(?:no\.?|number|#)?\s*[:\-]?\s*([x*\d][\dx*\s-]{4,24}\d)")
            .expect("statement account regex")
    })
}

pub fn find_statement_account(preamble: &str) -> Option<String> {
    statement_account_re().captures_iter(preamble).find_map(|caps| {
        let digits: String = caps[1]
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect::<String>()
            .to_uppercase();
        let count = digits.chars().filter(|c| c.is_ascii_digit()).count();
        (count >= 4).then_some(digits)
    })
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BankInfo {
    pub code: &'static str,
    pub name: &'static str,
}

/// Priority-ordered strategies; first match wins, generic fallback last
pub struct ParserRegistry {
    parsers: Vec<Box<dyn BankParser>>,
    fallback: Box<dyn BankParser>,
}

impl ParserRegistry {
    /// Empty registry: everything goes to the generic fallback
    pub fn new() -> Self {
        ParserRegistry {
            parsers: Vec::new(),
            fallback: Box::new(GenericParser::new()),
        }
    }

    /// Registry with every bundled bank strategy
    pub fn with_defaults() -> Self {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(SbiParser::new()));
        registry.register(Box::new(IndianBankParser::new()));
        registry.register(Box::new(KotakParser::new()));
        registry.register(Box::new(HdfcParser::new()));
        registry.register(Box::new(YesBankParser::new()));
        registry.register(Box::new(AxisParser::new()));
        registry.register(Box::new(JioPaymentsParser::new()));
        registry
    }

    /// Append a strategy at the lowest priority (still ahead of the fallback)
    pub fn register(&mut self, parser: Box<dyn BankParser>) {
        self.parsers.push(parser);
    }

    pub fn get(&self, code: &str) -> Option<&dyn BankParser> {
        self.parsers
            .iter()
            .find(|p| p.code().eq_ignore_ascii_case(code.trim()))
            .map(|p| p.as_ref())
            .or_else(|| {
                self.fallback
                    .code()
                    .eq_ignore_ascii_case(code.trim())
                    .then_some(self.fallback.as_ref())
            })
    }

    /// A hint naming a registered bank wins; otherwise first signature match
    pub fn select(&self, document: &ExtractedDocument, hint: Option<&str>) -> &dyn BankParser {
        if let Some(hint) = hint {
            match self.get(hint) {
                Some(parser) => return parser,
                None => tracing::warn!(hint, "unknown bank code hint, detecting from content"),
            }
        }

        self.parsers
            .iter()
            .find(|p| p.matches(document))
            .map(|p| p.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    pub fn banks(&self) -> Vec<BankInfo> {
        self.parsers
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|p| BankInfo {
                code: p.code(),
                name: p.name(),
            })
            .collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
