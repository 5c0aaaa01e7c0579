// Runtime configuration: defaults -> ingest.toml -> INGEST__* environment

use crate::error::Result;
use crate::normalizer::{DateOrder, NormalizerSettings};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Upper bound for one extraction call
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub date_order: DateOrder,

    /// Heuristic lists. Empty means "use the built-in list".
    #[serde(default)]
    pub self_transfer_keywords: Vec<String>,

    #[serde(default)]
    pub credit_keywords: Vec<String>,

    #[serde(default)]
    pub store_keywords: Vec<String>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("statements.db")
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_extraction_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            log_level: default_log_level(),
            log_json: false,
            date_order: DateOrder::default(),
            self_transfer_keywords: Vec::new(),
            credit_keywords: Vec::new(),
            store_keywords: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from `ingest.toml` (optional) and `INGEST__` env vars
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("ingest").required(false))
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("self_transfer_keywords")
                    .with_list_parse_key("credit_keywords")
                    .with_list_parse_key("store_keywords")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs.max(1))
    }

    /// Heuristic data for the normalizer, falling back to built-in lists
    pub fn normalizer_settings(&self) -> NormalizerSettings {
        let mut settings = NormalizerSettings {
            date_order: self.date_order,
            ..NormalizerSettings::default()
        };
        if !self.self_transfer_keywords.is_empty() {
            settings.self_transfer_keywords = lowercase_all(&self.self_transfer_keywords);
        }
        if !self.credit_keywords.is_empty() {
            settings.credit_keywords = lowercase_all(&self.credit_keywords);
        }
        if !self.store_keywords.is_empty() {
            settings.store_keywords = lowercase_all(&self.store_keywords);
        }
        settings
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}
