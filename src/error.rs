// Error taxonomy for the import pipeline
// Row-level errors are recovered by the orchestrator; the rest end the run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable, finite set of error kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    ParseError,
    BadAmount,
    BadDate,
    MissingRequiredField,
    Unrecognized,
    DuplicateRecord,
    LedgerReadFailure,
    LedgerWriteFailure,
    #[serde(rename = "source_io_failure")]
    SourceIOFailure,
    Cancelled,
    /// The worker itself broke; the run is abandoned
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::BadAmount => "bad_amount",
            ErrorKind::BadDate => "bad_date",
            ErrorKind::MissingRequiredField => "missing_required_field",
            ErrorKind::Unrecognized => "unrecognized",
            ErrorKind::DuplicateRecord => "duplicate_record",
            ErrorKind::LedgerReadFailure => "ledger_read_failure",
            ErrorKind::LedgerWriteFailure => "ledger_write_failure",
            ErrorKind::SourceIOFailure => "source_io_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// File-level kinds terminate the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedFormat
                | ErrorKind::LedgerReadFailure
                | ErrorKind::LedgerWriteFailure
                | ErrorKind::SourceIOFailure
                | ErrorKind::Cancelled
                | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error yielded by a format parser in place of a row
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// One line is malformed; the sequence continues
    #[error("row {row_index}: {detail}")]
    Malformed { row_index: usize, detail: String },

    /// The file as a whole cannot be read in this format; the sequence ends
    #[error("unreadable file structure: {detail}")]
    Structure { detail: String },

    /// The underlying stream failed; the sequence ends and the run fails
    #[error("source read failed: {detail}")]
    Io { detail: String },
}

impl ParseError {
    pub fn malformed(row_index: usize, detail: impl Into<String>) -> Self {
        ParseError::Malformed {
            row_index,
            detail: detail.into(),
        }
    }

    pub fn structure(detail: impl Into<String>) -> Self {
        ParseError::Structure {
            detail: detail.into(),
        }
    }

    pub fn row_index(&self) -> Option<usize> {
        match self {
            ParseError::Malformed { row_index, .. } => Some(*row_index),
            _ => None,
        }
    }

    /// No more items follow a terminal error
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ParseError::Malformed { .. })
    }

    pub fn is_io(&self) -> bool {
        matches!(self, ParseError::Io { .. })
    }
}

/// Row rejected by the validator & mapper
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("bad amount '{0}'")]
    BadAmount(String),

    #[error("bad date '{value}': {reason}")]
    BadDate { value: String, reason: String },

    #[error("missing required field '{0}'")]
    MissingRequiredField(&'static str),

    #[error("unrecognized {field} '{value}'")]
    Unrecognized { field: &'static str, value: String },
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::BadAmount(_) => ErrorKind::BadAmount,
            ValidationError::BadDate { .. } => ErrorKind::BadDate,
            ValidationError::MissingRequiredField(_) => ErrorKind::MissingRequiredField,
            ValidationError::Unrecognized { .. } => ErrorKind::Unrecognized,
        }
    }
}

/// Failure reported by a ledger capability
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("a record with key {0} already exists")]
    Conflict(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// File-level failure that ends an import run
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("no registered format recognizes '{0}'")]
    UnsupportedFormat(String),

    #[error("source I/O failure: {0}")]
    SourceIo(String),

    #[error("ledger read failed: {0}")]
    LedgerRead(#[source] LedgerError),

    #[error("ledger write failed: {0}")]
    LedgerWrite(#[source] LedgerError),
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            ImportError::SourceIo(_) => ErrorKind::SourceIOFailure,
            ImportError::LedgerRead(_) => ErrorKind::LedgerReadFailure,
            ImportError::LedgerWrite(_) => ErrorKind::LedgerWriteFailure,
        }
    }
}

/// Invalid or unreadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid rules JSON: {0}")]
    Rules(#[from] serde_json::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_kinds() {
        assert_eq!(ValidationError::BadAmount("x".into()).kind(), ErrorKind::BadAmount);
        assert_eq!(
            ValidationError::MissingRequiredField("date").kind(),
            ErrorKind::MissingRequiredField
        );
    }

    #[test]
    fn test_row_errors_are_not_fatal() {
        assert!(!ErrorKind::ParseError.is_fatal());
        assert!(!ErrorKind::BadDate.is_fatal());
        assert!(!ErrorKind::DuplicateRecord.is_fatal());
        assert!(ErrorKind::LedgerWriteFailure.is_fatal());
        assert!(ErrorKind::UnsupportedFormat.is_fatal());
    }

    #[test]
    fn test_parse_error_terminality() {
        assert!(!ParseError::malformed(3, "bad").is_terminal());
        assert!(ParseError::structure("not json").is_terminal());
        assert!(ParseError::Io { detail: "eof".into() }.is_io());
        assert_eq!(ParseError::malformed(7, "x").row_index(), Some(7));
    }

    #[test]
    fn test_error_kind_serializes_as_code() {
        for kind in [
            ErrorKind::BadAmount,
            ErrorKind::SourceIOFailure,
            ErrorKind::LedgerReadFailure,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.code());
            let back: ErrorKind = serde_json::from_value(json).unwrap();
            assert_eq!(back, kind);
        }
    }
}
