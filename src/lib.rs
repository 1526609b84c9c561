// Trust Import - Core Library
// Transaction import pipeline: detect -> parse -> validate -> dedup -> persist -> summarize

pub mod aggregator;
pub mod config;
pub mod db;
pub mod deduplication;
pub mod detector;
pub mod error;
pub mod ledger;
pub mod mapper;
pub mod model;
pub mod orchestrator;
pub mod outcome;
pub mod parser;
pub mod rules;
pub mod source;

// Re-export commonly used types
pub use config::{GenericCsvConfig, ImportConfig};
pub use db::{setup_database, SqliteLedger};
pub use deduplication::{Deduplicator, DuplicateReason};
pub use detector::{FormatDetector, HeaderLine, Peek, SniffTier, HEADER_SEARCH_LINES};
pub use error::{ConfigError, ErrorKind, ImportError, LedgerError, ParseError, ValidationError};
pub use ledger::{Ledger, LedgerRead, LedgerResult, LedgerWrite, MemoryLedger};
pub use mapper::RowMapper;
pub use model::{
    CanonicalRecord, Currency, Direction, ExternalKey, Money, RawRow, RecordId, Totals,
};
pub use orchestrator::{
    ImportCanceller, ImportHandle, ImportObserver, ImportSession, ImportState, Importer,
};
pub use outcome::{ImportOutcome, ImportSummary};
pub use parser::{
    AppleCardParser, BofAParser, FormatParser, GazprombankParser, GenericCsvParser, OzonParser,
    ParserRegistry, SberbankParser, StripeParser, TinkoffParser, VtbParser, WiseParser,
};
pub use rules::{CategoryRule, RuleEngine, RuleMatch};
pub use source::ImportSource;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
