// Parser Framework
// One FormatParser per bank export; the registry is an explicit list built at startup

pub mod apple_card;
pub mod bofa;
pub mod gazprombank;
pub mod generic_csv;
pub mod ozon;
pub mod sberbank;
mod statement;
pub mod stripe;
pub mod tinkoff;
pub mod vtb;
pub mod wise;

use csv::{ReaderBuilder, StringRecord};
use std::io::Read;
use std::sync::Arc;

use crate::config::ImportConfig;
use crate::detector::Peek;
use crate::error::ParseError;
use crate::model::{Direction, RawRow};

pub use apple_card::AppleCardParser;
pub use bofa::BofAParser;
pub use gazprombank::GazprombankParser;
pub use generic_csv::GenericCsvParser;
pub use ozon::OzonParser;
pub use sberbank::SberbankParser;
pub use stripe::StripeParser;
pub use tinkoff::TinkoffParser;
pub use vtb::VtbParser;
pub use wise::WiseParser;

pub type RowResult = Result<RawRow, ParseError>;

/// Lazy, finite, single-pass sequence of rows
pub type Rows<'a> = Box<dyn Iterator<Item = RowResult> + 'a>;

// ============================================================================
// COMPOSABLE TRAITS
// ============================================================================

/// FormatParser - the one required capability of a bank format
///
/// Adding a bank means implementing this trait and registering it; the
/// detector and orchestrator never change.
pub trait FormatParser: Send + Sync {
    /// Stable identifier, part of every external key this format produces
    fn id(&self) -> &'static str;

    /// Human-readable bank name for summaries
    fn label(&self) -> &str;

    /// Header-row signature match (highest detection priority)
    fn sniff_header(&self, peek: &Peek) -> bool;

    /// Delimiter / shape heuristics (second priority)
    fn sniff_delimiter(&self, _peek: &Peek) -> bool {
        false
    }

    /// Filename hint, only used to break ties between candidates
    fn matches_file_name(&self, _file_name: &str) -> bool {
        false
    }

    /// Parse the full source from its first byte
    ///
    /// Malformed lines come back as `ParseError::Malformed` and the sequence
    /// continues; a structural or I/O error is the last item.
    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a>;

    /// Parser version (for provenance in logs)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// MerchantExtractor - optional: pull a counterparty out of a free-text description
pub trait MerchantExtractor {
    fn extract_merchant(&self, description: &str) -> Option<String>;
}

/// DirectionClassifier - optional: recognise transfers and payments from text
pub trait DirectionClassifier {
    fn classify_direction(&self, description: &str) -> Option<Direction>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Registered parsers in detection order
pub struct ParserRegistry {
    parsers: Vec<Box<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        ParserRegistry {
            parsers: Vec::new(),
        }
    }

    /// Every shipped format; specific bank formats first, the generic CSV last
    pub fn standard(config: &ImportConfig) -> Self {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(TinkoffParser::new()));
        registry.register(Box::new(SberbankParser::new()));
        registry.register(Box::new(VtbParser::new()));
        registry.register(Box::new(GazprombankParser::new()));
        registry.register(Box::new(OzonParser::new()));
        registry.register(Box::new(WiseParser::new()));
        registry.register(Box::new(AppleCardParser::new()));
        registry.register(Box::new(BofAParser::new()));
        registry.register(Box::new(StripeParser::new()));
        registry.register(Box::new(GenericCsvParser::new(config.generic_csv.clone())));
        registry
    }

    /// Register a parser; a parser with the same id is replaced in place
    pub fn register(&mut self, parser: Box<dyn FormatParser>) {
        if let Some(slot) = self.parsers.iter_mut().find(|p| p.id() == parser.id()) {
            tracing::warn!(format = parser.id(), "replacing registered parser");
            *slot = parser;
        } else {
            self.parsers.push(parser);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn FormatParser> {
        self.parsers.iter().map(|p| p.as_ref())
    }

    pub fn get(&self, id: &str) -> Option<&dyn FormatParser> {
        self.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SHARED CSV PLUMBING
// ============================================================================

pub(crate) fn patterns(list: &[&str]) -> Arc<Vec<String>> {
    Arc::new(list.iter().map(|p| p.to_string()).collect())
}

pub(crate) fn csv_reader<'a>(
    source: Box<dyn Read + 'a>,
    delimiter: u8,
    has_headers: bool,
) -> csv::Reader<Box<dyn Read + 'a>> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source)
}

/// Drive a CSV reader through `map_record`; blank records are dropped,
/// `None` from the closure drops a non-transaction line silently
pub(crate) fn csv_rows<'a, F>(reader: csv::Reader<Box<dyn Read + 'a>>, mut map_record: F) -> Rows<'a>
where
    F: FnMut(&StringRecord) -> Option<RowResult> + 'a,
{
    let rows = reader.into_records().filter_map(move |result| match result {
        Ok(record) if is_blank(&record) => None,
        Ok(record) => map_record(&record),
        Err(err) => Some(Err(csv_error(err))),
    });
    until_terminal(rows)
}

/// Stop right after the first terminal error
pub(crate) fn until_terminal<'a, I>(rows: I) -> Rows<'a>
where
    I: Iterator<Item = RowResult> + 'a,
{
    let mut finished = false;
    Box::new(rows.map_while(move |item| {
        if finished {
            return None;
        }
        if let Err(err) = &item {
            finished = err.is_terminal();
        }
        Some(item)
    }))
}

pub(crate) fn failed<'a>(err: ParseError) -> Rows<'a> {
    Box::new(std::iter::once(Err(err)))
}

pub(crate) fn record_line(record: &StringRecord) -> usize {
    record.position().map(|p| p.line() as usize).unwrap_or(0)
}

pub(crate) fn raw_line(record: &StringRecord, delimiter: char) -> String {
    record.iter().collect::<Vec<_>>().join(&delimiter.to_string())
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

pub(crate) fn csv_error(err: csv::Error) -> ParseError {
    let row_index = err.position().map(|p| p.line() as usize).unwrap_or(0);
    match err.kind() {
        csv::ErrorKind::Io(e) => ParseError::Io {
            detail: e.to_string(),
        },
        csv::ErrorKind::Utf8 { err: e, .. } => {
            ParseError::malformed(row_index, format!("invalid UTF-8: {}", e))
        }
        _ => ParseError::malformed(row_index, err.to_string()),
    }
}

/// Column lookup by header name, for formats whose column order varies
pub(crate) struct HeaderIndex {
    columns: Vec<String>,
}

impl HeaderIndex {
    pub fn read<R: Read>(reader: &mut csv::Reader<R>) -> Result<Self, ParseError> {
        let headers = reader.headers().map_err(|err| match csv_error(err) {
            io @ ParseError::Io { .. } => io,
            other => ParseError::structure(format!("unreadable header row: {}", other)),
        })?;
        Ok(HeaderIndex::new(headers))
    }

    pub fn new(headers: &StringRecord) -> Self {
        let columns = headers
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        HeaderIndex { columns }
    }

    /// First column whose name equals one of `names` ("amount" also finds "amount (usd)")
    pub fn find(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.columns
                .iter()
                .position(|c| c == name || c.starts_with(&format!("{} (", name)))
        })
    }

    pub fn require(&self, field: &str, names: &[&str]) -> Result<usize, ParseError> {
        self.find(names)
            .ok_or_else(|| ParseError::structure(format!("missing '{}' column", field)))
    }
}

/// Text after the first whole-word marker ("from", "to"), in marker order
pub(crate) fn after_marker(description: &str, markers: &[&str]) -> Option<String> {
    markers.iter().find_map(|marker| {
        let head = format!("{} ", marker);
        let start = if description.starts_with(&head) {
            head.len()
        } else {
            description.find(&format!(" {}", head))? + head.len() + 1
        };
        let merchant = description[start..].trim();
        (!merchant.is_empty()).then(|| merchant.to_string())
    })
}

/// Field by index, empty when the record is short
pub(crate) fn field(record: &StringRecord, index: usize) -> String {
    record.get(index).unwrap_or("").to_string()
}

pub(crate) fn opt_field(record: &StringRecord, index: Option<usize>) -> String {
    index.map(|i| field(record, i)).unwrap_or_default()
}
