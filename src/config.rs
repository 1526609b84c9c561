// Import configuration
// Loaded from TOML; every field has a default so an empty file is valid

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::Currency;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Ledger account every imported record is written into
    pub account: String,

    /// Currency for rows whose format carries none
    pub default_currency: String,

    /// Dates further than this many days after today are rejected
    pub max_future_days: i64,

    /// Bytes the detector may buffer before choosing a parser
    pub peek_bytes: usize,

    /// Outcome events buffered before the worker blocks on the consumer
    pub channel_capacity: usize,

    /// Emit a Progress event every N processed rows
    pub progress_every: usize,

    /// Also match date + amount + counterparty when the key is a fingerprint
    pub fallback_dedup: bool,

    /// Optional JSON file with category rules
    pub rules_file: Option<PathBuf>,

    pub generic_csv: GenericCsvConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            account: "main".to_string(),
            default_currency: "USD".to_string(),
            max_future_days: 1,
            peek_bytes: 8 * 1024,
            channel_capacity: 1,
            progress_every: 1,
            fallback_dedup: true,
            rules_file: None,
            generic_csv: GenericCsvConfig::default(),
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ImportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.trim().is_empty() {
            return Err(invalid("account", "must not be empty"));
        }
        self.currency()?;
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "must be at least 1"));
        }
        if self.progress_every == 0 {
            return Err(invalid("progress_every", "must be at least 1"));
        }
        if self.peek_bytes < 64 {
            return Err(invalid("peek_bytes", "must be at least 64"));
        }
        if !(0..=MAX_FUTURE_DAYS).contains(&self.max_future_days) {
            return Err(invalid(
                "max_future_days",
                &format!("must be between 0 and {}", MAX_FUTURE_DAYS),
            ));
        }
        self.generic_csv.validate()
    }

    pub fn currency(&self) -> Result<Currency, ConfigError> {
        Currency::new(&self.default_currency)
            .ok_or_else(|| invalid("default_currency", &self.default_currency))
    }
}

/// Column layout for the configurable CSV format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericCsvConfig {
    pub label: String,
    pub delimiter: char,
    pub has_header: bool,
    pub date_column: usize,
    pub description_column: usize,
    pub amount_column: usize,
    pub currency_column: Option<usize>,
    pub counterparty_column: Option<usize>,
    pub category_column: Option<usize>,
    /// Column whose value marks an expense explicitly
    pub expense_column: Option<usize>,
    pub expense_true_value: String,
    pub status_column: Option<usize>,
    /// Rows whose status is not listed are skipped (empty = no filter)
    pub valid_statuses: Vec<String>,
    pub date_formats: Vec<String>,
    pub decimal_separator: char,
    pub min_columns: usize,
}

impl Default for GenericCsvConfig {
    fn default() -> Self {
        GenericCsvConfig {
            label: "Generic CSV".to_string(),
            delimiter: ',',
            has_header: true,
            date_column: 0,
            description_column: 1,
            amount_column: 2,
            currency_column: Some(3),
            counterparty_column: None,
            category_column: None,
            expense_column: None,
            expense_true_value: "true".to_string(),
            status_column: None,
            valid_statuses: Vec::new(),
            date_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%d.%m.%Y".to_string(),
                "%m/%d/%Y".to_string(),
            ],
            decimal_separator: '.',
            min_columns: 3,
        }
    }
}

impl GenericCsvConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.delimiter.is_ascii() {
            return Err(invalid("generic_csv.delimiter", "must be an ASCII character"));
        }
        if !matches!(self.decimal_separator, '.' | ',') {
            return Err(invalid("generic_csv.decimal_separator", "must be '.' or ','"));
        }
        if self.date_formats.is_empty() {
            return Err(invalid("generic_csv.date_formats", "at least one pattern required"));
        }
        let highest = [self.date_column, self.description_column, self.amount_column]
            .into_iter()
            .max()
            .unwrap_or(0);
        if self.min_columns <= highest {
            return Err(invalid(
                "generic_csv.min_columns",
                &format!("must exceed the highest required column index ({})", highest),
            ));
        }
        Ok(())
    }
}

/// Upper bound for `max_future_days`, about a century
pub const MAX_FUTURE_DAYS: i64 = 36_500;

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
