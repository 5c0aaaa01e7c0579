// Multi-line Transaction Buffer
//
// One open buffer at a time. An anchor line closes the open buffer and seeds a
// new one; continuation lines are appended verbatim. The joined lines are the
// record's raw text, kept for every bank.

use crate::loader::SourceLine;
use serde::{Deserialize, Serialize};

/// Lines belonging to one candidate transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineGroup {
    /// Anchor line first, then continuation lines, untouched
    pub lines: Vec<String>,
    /// Index of the anchor within the extracted document
    pub first_line: usize,
    /// Page or row of the anchor
    pub position: usize,
}

impl LineGroup {
    pub fn anchor(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn continuation(&self) -> &[String] {
        self.lines.get(1..).unwrap_or(&[])
    }

    /// Newline-joined source lines
    pub fn raw_text(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Default)]
pub struct TransactionBuffer {
    open: Option<LineGroup>,
    flushed: Vec<LineGroup>,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the open group (if any) and start a new one at `line`
    pub fn start(&mut self, line: &SourceLine, index: usize) {
        self.flush();
        self.open = Some(LineGroup {
            lines: vec![line.text.clone()],
            first_line: index,
            position: line.position,
        });
    }

    /// Append a continuation line. Returns false when no group is open
    /// (the line precedes the first anchor and is header material).
    pub fn append(&mut self, line: &SourceLine) -> bool {
        match self.open.as_mut() {
            Some(group) => {
                group.lines.push(line.text.clone());
                true
            }
            None => false,
        }
    }

    pub fn flush(&mut self) {
        if let Some(group) = self.open.take() {
            self.flushed.push(group);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn finish(mut self) -> Vec<LineGroup> {
        self.flush();
        self.flushed
    }
}

/// Split lines into groups at every anchor. Noise lines are skipped entirely;
/// lines before the first anchor are dropped as header.
pub fn group_lines<A, N>(lines: &[SourceLine], is_anchor: A, is_noise: N) -> Vec<LineGroup>
where
    A: Fn(&str) -> bool,
    N: Fn(&str) -> bool,
{
    let mut buffer = TransactionBuffer::new();
    for (index, line) in lines.iter().enumerate() {
        if is_noise(&line.text) {
            continue;
        }
        if is_anchor(&line.text) {
            buffer.start(line, index);
        } else {
            buffer.append(line);
        }
    }
    buffer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<SourceLine> {
        texts
            .iter()
            .map(|t| SourceLine {
                text: t.to_string(),
                position: 1,
            })
            .collect()
    }

    fn starts_with_digit(line: &str) -> bool {
        line.trim_start()
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
    }

    #[test]
    fn test_continuation_lines_join_the_open_group() {
        let input = lines(&[
            "Statement of account",
            "01/02/2024  TRANSFER  250.00  1000.00",
            "UPI/1234/JOHN DOE/HDFC",
            "02/02/2024  ATM WDL  100.00  900.00",
        ]);
        let groups = group_lines(&input, starts_with_digit, |_| false);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].lines.len(), 2);
        assert_eq!(
            groups[0].raw_text(),
            "01/02/2024  TRANSFER  250.00  1000.00\nUPI/1234/JOHN DOE/HDFC"
        );
        assert_eq!(groups[0].first_line, 1);
        assert_eq!(groups[1].continuation().len(), 0);
    }

    #[test]
    fn test_noise_lines_are_skipped() {
        let input = lines(&[
            "01/02/2024  A  1.00",
            "Page 1 of 2",
            "continued text",
        ]);
        let groups = group_lines(&input, starts_with_digit, |l| l.starts_with("Page"));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].lines, vec!["01/02/2024  A  1.00", "continued text"]);
    }

    #[test]
    fn test_raw_text_round_trip() {
        let input = lines(&[
            "05/03/2024   POS 4111XXXX1111   ",
            "   AMAZON RETAIL   ",
            "MUMBAI",
        ]);
        let groups = group_lines(&input, starts_with_digit, |_| false);
        let rebuilt: Vec<String> = groups[0].raw_text().lines().map(String::from).collect();
        let original: Vec<String> = input.iter().map(|l| l.text.clone()).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_header_lines_never_open_a_group() {
        let mut buffer = TransactionBuffer::new();
        let header = SourceLine {
            text: "Account Name: X".to_string(),
            position: 1,
        };
        assert!(!buffer.append(&header));
        assert!(!buffer.is_open());
        assert!(buffer.finish().is_empty());
    }
}
