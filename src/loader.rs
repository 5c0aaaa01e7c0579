// Document Loader - format detection and extractor dispatch
//
// The filename extension is the only format signal. Declared MIME types are
// ignored. The loader never parses statement content itself: it hands the
// bytes to a TextExtractor and returns lines plus structural boundaries.

use crate::error::{IngestError, Result};
use anyhow::Context;
use calamine::{Data, DataType, Range, Reader, Xls, Xlsx};
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Seek};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentFormat {
    Pdf,
    Xls,
    Xlsx,
    Doc,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Detect format from the filename extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "xls" => Ok(DocumentFormat::Xls),
            "xlsx" => Ok(DocumentFormat::Xlsx),
            "doc" => Ok(DocumentFormat::Doc),
            "docx" => Ok(DocumentFormat::Docx),
            "txt" => Ok(DocumentFormat::Txt),
            "" => Err(IngestError::UnsupportedFormat(format!(
                "'{}' has no file extension",
                filename
            ))),
            other => Err(IngestError::UnsupportedFormat(format!(
                ".{} (supported: pdf, xls, xlsx, doc, docx, txt)",
                other
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Xls => "xls",
            DocumentFormat::Xlsx => "xlsx",
            DocumentFormat::Doc => "doc",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Txt => "txt",
        }
    }

    /// Spreadsheets come back as rows, everything else as text
    pub fn is_tabular(&self) -> bool {
        matches!(self, DocumentFormat::Xls | DocumentFormat::Xlsx)
    }
}

// ============================================================================
// RAW DOCUMENT
// ============================================================================

/// Uploaded statement. Transient: dropped once the preview is built.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Arc<[u8]>,
    pub format: DocumentFormat,
    pub filename: String,
    pub bank_hint: Option<String>,
}

impl RawDocument {
    /// Fails with UnsupportedFormat before any other work happens
    pub fn new(bytes: Vec<u8>, filename: &str, bank_hint: Option<String>) -> Result<Self> {
        let format = DocumentFormat::from_filename(filename)?;
        Ok(RawDocument {
            bytes: Arc::from(bytes),
            format,
            filename: filename.to_string(),
            bank_hint: bank_hint
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
        })
    }

    /// Content-derived id, stable across re-uploads of the same bytes
    pub fn source_document_id(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        let hex = format!("{:x}", digest);
        hex[..16].to_string()
    }
}

// ============================================================================
// EXTRACTED CONTENT
// ============================================================================

/// What an extractor hands back
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Plain text; form feeds separate pages
    Text(String),
    /// Tabular rows, one Vec of cell strings per row
    Rows(Vec<Vec<String>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    pub text: String,
    /// 1-based page (text documents) or row (spreadsheets)
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Boundaries {
    Pages(usize),
    Rows(usize),
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub format: DocumentFormat,
    pub lines: Vec<SourceLine>,
    pub boundaries: Boundaries,
}

impl ExtractedDocument {
    pub fn from_extraction(format: DocumentFormat, extraction: Extraction) -> Self {
        match extraction {
            Extraction::Text(text) => Self::from_text(format, &text),
            Extraction::Rows(rows) => Self::from_rows(format, &rows),
        }
    }

    pub fn from_text(format: DocumentFormat, text: &str) -> Self {
        let pages: Vec<&str> = text.split('\u{000C}').collect();
        let mut lines = Vec::new();
        for (idx, page) in pages.iter().enumerate() {
            for line in page.lines() {
                let line = line.trim_end_matches('\r');
                if line.trim().is_empty() {
                    continue;
                }
                lines.push(SourceLine {
                    text: line.to_string(),
                    position: idx + 1,
                });
            }
        }
        ExtractedDocument {
            format,
            lines,
            boundaries: Boundaries::Pages(pages.len()),
        }
    }

    /// Rows are flattened to text lines so every bank strategy reads one shape.
    /// Interior empty cells become "-" to keep column positions.
    pub fn from_rows(format: DocumentFormat, rows: &[Vec<String>]) -> Self {
        let mut lines = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let cells: Vec<&str> = row.iter().map(|c| c.trim()).collect();
            let first = cells.iter().position(|c| !c.is_empty());
            let last = cells.iter().rposition(|c| !c.is_empty());
            let (Some(first), Some(last)) = (first, last) else {
                continue;
            };
            let text = cells[first..=last]
                .iter()
                .map(|c| if c.is_empty() { "-" } else { *c })
                .collect::<Vec<_>>()
                .join("  ");
            lines.push(SourceLine {
                text,
                position: idx + 1,
            });
        }
        ExtractedDocument {
            format,
            lines,
            boundaries: Boundaries::Rows(rows.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ============================================================================
// EXTRACTOR BOUNDARY
// ============================================================================

/// Text/row extraction service. May be slow; the loader bounds it with a timeout.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, format: DocumentFormat, bytes: &[u8]) -> anyhow::Result<Extraction>;
}

/// Run the extractor on a worker thread and give up after `timeout`.
///
/// Single attempt: re-parsing identical bytes is deterministic, so retries
/// belong to the caller.
pub fn load_document(
    document: &RawDocument,
    extractor: Arc<dyn TextExtractor>,
    timeout: Duration,
) -> Result<ExtractedDocument> {
    let (tx, rx) = mpsc::channel();
    let bytes = Arc::clone(&document.bytes);
    let format = document.format;

    thread::Builder::new()
        .name("statement-extract".to_string())
        .spawn(move || {
            // receiver may be gone after a timeout
            let _ = tx.send(extractor.extract(format, &bytes));
        })
        .map_err(|e| IngestError::ExtractionFailure(format!("could not start extractor: {}", e)))?;

    let extraction = match rx.recv_timeout(timeout) {
        Ok(Ok(extraction)) => extraction,
        Ok(Err(e)) => {
            return Err(IngestError::ExtractionFailure(format!(
                "{}: {:#}",
                document.filename, e
            )))
        }
        Err(RecvTimeoutError::Timeout) => {
            return Err(IngestError::ExtractionFailure(format!(
                "{}: timed out after {}ms",
                document.filename,
                timeout.as_millis()
            )))
        }
        Err(RecvTimeoutError::Disconnected) => {
            return Err(IngestError::ExtractionFailure(format!(
                "{}: extractor terminated without a result",
                document.filename
            )))
        }
    };

    let extracted = ExtractedDocument::from_extraction(format, extraction);
    if extracted.is_empty() {
        return Err(IngestError::ExtractionFailure(format!(
            "{}: no text could be extracted",
            document.filename
        )));
    }

    tracing::debug!(
        filename = %document.filename,
        format = format.extension(),
        lines = extracted.lines.len(),
        boundaries = ?extracted.boundaries,
        "document extracted"
    );

    Ok(extracted)
}

// ============================================================================
// LOCAL EXTRACTOR
// ============================================================================

/// In-process extractor covering every supported format
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExtractor;

impl TextExtractor for LocalExtractor {
    fn extract(&self, format: DocumentFormat, bytes: &[u8]) -> anyhow::Result<Extraction> {
        match format {
            DocumentFormat::Pdf => {
                let text = pdf_extract::extract_text_from_mem(bytes)
                    .context("failed to read PDF text")?;
                Ok(Extraction::Text(text))
            }
            DocumentFormat::Xlsx => {
                let workbook = Xlsx::new(Cursor::new(bytes.to_vec()))
                    .map_err(|e| anyhow::anyhow!("failed to open xlsx: {:?}", e))?;
                Ok(Extraction::Rows(range_rows(&first_sheet::<Cursor<Vec<u8>>, _>(workbook)?)))
            }
            DocumentFormat::Xls => {
                let workbook = Xls::new(Cursor::new(bytes.to_vec()))
                    .map_err(|e| anyhow::anyhow!("failed to open xls: {:?}", e))?;
                Ok(Extraction::Rows(range_rows(&first_sheet::<Cursor<Vec<u8>>, _>(workbook)?)))
            }
            DocumentFormat::Docx => Ok(Extraction::Text(docx_text(bytes)?)),
            DocumentFormat::Doc => Ok(Extraction::Text(legacy_doc_text(bytes))),
            DocumentFormat::Txt => Ok(Extraction::Text(String::from_utf8_lossy(bytes).into_owned())),
        }
    }
}

fn first_sheet<RS, R>(mut workbook: R) -> anyhow::Result<Range<Data>>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("workbook has no sheets"))?;
    workbook
        .worksheet_range(&name)
        .map_err(|e| anyhow::anyhow!("failed to read sheet '{}': {:?}", name, e))
}

fn range_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    range
        .rows()
        .map(|row| row.iter().map(render_cell).collect())
        .collect()
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) => format!("{:.2}", f),
        Data::Int(i) => format!("{}.00", i),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string().trim().to_string(),
    }
}

/// DOCX: one line per paragraph; table cells of one row share a line
fn docx_text(bytes: &[u8]) -> anyhow::Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("docx is not a zip archive")?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("docx has no word/document.xml")?
        .read_to_string(&mut xml)
        .context("failed to read word/document.xml")?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut out = String::new();
    let mut current = String::new();
    let mut row_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:tr" => row_depth += 1,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:p" if row_depth > 0 => current.push_str("  "),
                b"w:p" => flush_line(&mut out, &mut current),
                b"w:tr" => {
                    row_depth = row_depth.saturating_sub(1);
                    flush_line(&mut out, &mut current);
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push_str("  "),
                b"w:br" => flush_line(&mut out, &mut current),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape().context("bad text node in docx")?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("malformed docx xml: {}", e)),
            _ => {}
        }
    }
    flush_line(&mut out, &mut current);
    Ok(out)
}

fn flush_line(out: &mut String, current: &mut String) {
    let line = current.trim_end();
    if !line.trim().is_empty() {
        out.push_str(line);
        out.push('\n');
    }
    current.clear();
}

/// Legacy .doc: best-effort scan for printable text runs.
///
/// Word stores body text either as 8-bit runs or as UTF-16LE; dropping NUL
/// bytes turns the latter's ASCII into contiguous runs as well.
fn legacy_doc_text(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut run = String::new();
    for &b in bytes.iter().filter(|&&b| b != 0) {
        match b {
            b'\r' | b'\n' | 0x0B => push_run(&mut out, &mut run),
            b'\t' => run.push_str("  "),
            0x20..=0x7E => run.push(b as char),
            _ => push_run(&mut out, &mut run),
        }
    }
    push_run(&mut out, &mut run);
    out
}

fn push_run(out: &mut String, run: &mut String) {
    let text = run.trim();
    if text.len() >= 4 && text.chars().any(|c| c.is_ascii_alphanumeric()) {
        out.push_str(text);
        out.push('\n');
    }
    run.clear();
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct FixedExtractor(Extraction);

    impl TextExtractor for FixedExtractor {
        fn extract(&self, _format: DocumentFormat, _bytes: &[u8]) -> anyhow::Result<Extraction> {
            Ok(self.0.clone())
        }
    }

    struct SlowExtractor;

    impl TextExtractor for SlowExtractor {
        fn extract(&self, _format: DocumentFormat, _bytes: &[u8]) -> anyhow::Result<Extraction> {
            thread::sleep(Duration::from_millis(500));
            Ok(Extraction::Text("01/01/2024 LATE 1.00".to_string()))
        }
    }

    struct FailingExtractor;

    impl TextExtractor for FailingExtractor {
        fn extract(&self, _format: DocumentFormat, _bytes: &[u8]) -> anyhow::Result<Extraction> {
            Err(anyhow::anyhow!("encrypted document"))
        }
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_filename("march.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("a.b.xlsx").unwrap(), DocumentFormat::Xlsx);
        assert_eq!(DocumentFormat::from_filename("s.xls").unwrap(), DocumentFormat::Xls);
        assert_eq!(DocumentFormat::from_filename("s.docx").unwrap(), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_filename("s.doc").unwrap(), DocumentFormat::Doc);
        assert_eq!(DocumentFormat::from_filename("s.txt").unwrap(), DocumentFormat::Txt);
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let err = RawDocument::new(b"%PDF-1.4".to_vec(), "statement.csv", None).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));

        let err = DocumentFormat::from_filename("statement").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_blank_bank_hint_is_ignored() {
        let doc = RawDocument::new(vec![1, 2, 3], "s.txt", Some("  ".to_string())).unwrap();
        assert_eq!(doc.bank_hint, None);
    }

    #[test]
    fn test_source_document_id_is_content_derived() {
        let a = RawDocument::new(b"same".to_vec(), "a.txt", None).unwrap();
        let b = RawDocument::new(b"same".to_vec(), "b.pdf", None).unwrap();
        let c = RawDocument::new(b"other".to_vec(), "a.txt", None).unwrap();
        assert_eq!(a.source_document_id(), b.source_document_id());
        assert_ne!(a.source_document_id(), c.source_document_id());
        assert_eq!(a.source_document_id().len(), 16);
    }

    #[test]
    fn test_text_pages_and_blank_lines() {
        let doc = ExtractedDocument::from_text(
            DocumentFormat::Pdf,
            "header\r\n\n01/01/2024 A 1.00\u{000C}02/01/2024 B 2.00\n   \n",
        );
        assert_eq!(doc.boundaries, Boundaries::Pages(2));
        assert_eq!(doc.lines.len(), 3);
        assert_eq!(doc.lines[0].text, "header");
        assert_eq!(doc.lines[2].position, 2);
    }

    #[test]
    fn test_rows_keep_interior_blank_cells() {
        let rows = vec![
            vec!["".to_string(), "".to_string()],
            vec![
                "01/02/2024".to_string(),
                "ATM WDL".to_string(),
                "500.00".to_string(),
                "".to_string(),
                "1500.00".to_string(),
                "".to_string(),
            ],
        ];
        let doc = ExtractedDocument::from_rows(DocumentFormat::Xlsx, &rows);
        assert_eq!(doc.boundaries, Boundaries::Rows(2));
        assert_eq!(doc.lines.len(), 1);
        assert_eq!(doc.lines[0].text, "01/02/2024  ATM WDL  500.00  -  1500.00");
        assert_eq!(doc.lines[0].position, 2);
    }

    #[test]
    fn test_render_numeric_cells() {
        assert_eq!(render_cell(&Data::Float(1500.5)), "1500.50");
        assert_eq!(render_cell(&Data::Int(42)), "42.00");
        assert_eq!(render_cell(&Data::String(" UPI ".to_string())), "UPI");
        assert_eq!(render_cell(&Data::Empty), "");
    }

    #[test]
    fn test_load_document_dispatches_to_extractor() {
        let doc = RawDocument::new(vec![0], "s.txt", None).unwrap();
        let extractor = Arc::new(FixedExtractor(Extraction::Text(
            "01/01/2024 TEST 10.00".to_string(),
        )));
        let extracted = load_document(&doc, extractor, Duration::from_secs(5)).unwrap();
        assert_eq!(extracted.lines.len(), 1);
        assert_eq!(extracted.format, DocumentFormat::Txt);
    }

    #[test]
    fn test_load_document_times_out() {
        let doc = RawDocument::new(vec![0], "s.pdf", None).unwrap();
        let err = load_document(&doc, Arc::new(SlowExtractor), Duration::from_millis(20)).unwrap_err();
        match err {
            IngestError::ExtractionFailure(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_load_document_extractor_error() {
        let doc = RawDocument::new(vec![0], "s.pdf", None).unwrap();
        let err = load_document(&doc, Arc::new(FailingExtractor), Duration::from_secs(5)).unwrap_err();
        match err {
            IngestError::ExtractionFailure(msg) => assert!(msg.contains("encrypted document")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_load_document_empty_text_is_failure() {
        let doc = RawDocument::new(vec![0], "s.txt", None).unwrap();
        let extractor = Arc::new(FixedExtractor(Extraction::Text("  \n\n".to_string())));
        let err = load_document(&doc, extractor, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFailure(_)));
    }

    #[test]
    fn test_local_extractor_txt() {
        let extraction = LocalExtractor
            .extract(DocumentFormat::Txt, "01/01/2024 CAFÉ 10.00\n".as_bytes())
            .unwrap();
        assert_eq!(extraction, Extraction::Text("01/01/2024 CAFÉ 10.00\n".to_string()));
    }

    #[test]
    fn test_local_extractor_docx_paragraphs_and_tables() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>Account Statement</w:t></w:r></w:p>
<w:tbl><w:tr>
<w:tc><w:p><w:r><w:t>01/02/2024</w:t></w:r></w:p></w:tc>
<w:tc><w:p><w:r><w:t>NEFT SALARY</w:t></w:r></w:p></w:tc>
<w:tc><w:p><w:r><w:t>500.00</w:t></w:r></w:p></w:tc>
</w:tr></w:tbl>
</w:body></w:document>"#;
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let extraction = LocalExtractor.extract(DocumentFormat::Docx, &bytes).unwrap();
        let Extraction::Text(text) = extraction else {
            panic!("docx should extract as text");
        };
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Account Statement");
        assert_eq!(lines[1], "01/02/2024  NEFT SALARY  500.00");
    }

    #[test]
    fn test_local_extractor_xlsx_rows_and_dates() {
        let bytes = fixtures::xlsx_with_rows(&fixtures::statement_sheet());
        let extraction = LocalExtractor.extract(DocumentFormat::Xlsx, &bytes).unwrap();
        let Extraction::Rows(rows) = extraction else {
            panic!("xlsx should extract as rows");
        };
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2][0], "01/02/2024");
        assert_eq!(rows[2][1], "ATM WDL MG ROAD");
        assert_eq!(rows[2][2], "500.00");
        assert_eq!(rows[2][3], "");
        assert_eq!(rows[3][0], "02/02/2024");

        let doc = ExtractedDocument::from_rows(DocumentFormat::Xlsx, &rows);
        assert_eq!(doc.lines[2].text, "01/02/2024  ATM WDL MG ROAD  500.00  -  9500.00");
    }

    #[test]
    fn test_local_extractor_docx_rejects_non_zip() {
        assert!(LocalExtractor.extract(DocumentFormat::Docx, b"not a zip").is_err());
    }

    #[test]
    fn test_legacy_doc_scan_finds_utf16_text() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0];
        for ch in "01/02/2024 ATM 500.00\r".encode_utf16() {
            bytes.extend_from_slice(&ch.to_le_bytes());
        }
        bytes.extend_from_slice(&[0xFF, 0xFE, 0x01]);
        let text = legacy_doc_text(&bytes);
        assert!(text.lines().any(|l| l == "01/02/2024 ATM 500.00"));
    }
}
