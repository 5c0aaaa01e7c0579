// Statement Ingest - CLI
//
//   statement-ingest parse <file> [--bank CODE] [--format json|csv]
//   statement-ingest import <file> --user ID [--bank CODE]
//   statement-ingest banks

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use statement_ingest::{
    import_records, logging::init_tracing, open_database, parse_preview, IngestConfig,
    LocalExtractor, ParseContext, ParserRegistry, PreviewResult, RawDocument,
};

#[derive(Parser)]
#[command(name = "statement-ingest", version, about = "Bank statement ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a statement and print the preview
    Parse {
        file: PathBuf,

        /// Bank code, skips content detection (e.g. HDFC, SBIN)
        #[arg(long)]
        bank: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Parse a statement and store its records for a user
    Import {
        file: PathBuf,

        #[arg(long)]
        user: String,

        #[arg(long)]
        bank: Option<String>,
    },

    /// List registered bank strategies in detection order
    Banks,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = IngestConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);

    let registry = ParserRegistry::with_defaults();

    match cli.command {
        Command::Parse { file, bank, format } => {
            let preview = run_parse(&config, &registry, &file, bank)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&preview)?),
                OutputFormat::Csv => write_csv(&preview)?,
            }
        }
        Command::Import { file, user, bank } => {
            let preview = run_parse(&config, &registry, &file, bank)?;
            let conn = open_database(&config.database_path).with_context(|| {
                format!("Failed to open database {}", config.database_path.display())
            })?;
            let summary = import_records(&conn, &user, &preview.records)
                .with_context(|| format!("Failed to import {}", file.display()))?;

            println!("✓ Parsed {} records from {} ({})", preview.records.len(), file.display(), preview.bank_code);
            if preview.dropped_count > 0 || preview.filtered_count > 0 {
                println!(
                    "  {} dropped for invalid dates, {} without amounts",
                    preview.dropped_count, preview.filtered_count
                );
            }
            println!("✓ Created: {}", summary.created);
            println!("✓ Duplicates skipped: {}", summary.skipped_duplicates);
            if summary.rejected > 0 {
                println!("⚠ Rejected: {}", summary.rejected);
            }
        }
        Command::Banks => {
            for bank in registry.banks() {
                println!("{:<8} {}", bank.code, bank.name);
            }
        }
    }

    Ok(())
}

fn run_parse(
    config: &IngestConfig,
    registry: &ParserRegistry,
    file: &Path,
    bank: Option<String>,
) -> Result<PreviewResult> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let settings = config.normalizer_settings();
    let ctx = ParseContext {
        extractor: Arc::new(LocalExtractor),
        timeout: config.extraction_timeout(),
        registry,
        settings: &settings,
    };

    let document = RawDocument::new(bytes, &filename, bank)?;
    let preview = parse_preview(&document, &ctx)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    Ok(preview)
}

fn write_csv(preview: &PreviewResult) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    for record in &preview.records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
