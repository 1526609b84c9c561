// Events an import run delivers to its caller

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorKind;
use crate::model::Totals;

/// Final counters of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported_count: usize,
    /// Duplicates, invalid rows and non-transaction rows
    pub skipped_count: usize,
    /// Rows the parser could not read
    pub failed_count: usize,
    /// Subset of `skipped_count`
    pub duplicate_count: usize,
    /// Net signed amount of imported records, per currency
    pub total_amount: Totals,
    pub bank_label: String,
    /// One line per skipped or failed row, then a summary line
    pub log: Vec<String>,
}

impl ImportSummary {
    pub fn processed(&self) -> usize {
        self.imported_count + self.skipped_count + self.failed_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportOutcome {
    Progress {
        processed: usize,
        /// Known only once the source is exhausted
        total: Option<usize>,
        message: String,
    },
    RowSkipped {
        row_index: usize,
        reason: String,
    },
    RowFailed {
        /// None for file-level structure errors
        row_index: Option<usize>,
        error_kind: ErrorKind,
        detail: String,
    },
    Completed {
        summary: ImportSummary,
    },
    Failed {
        error_kind: ErrorKind,
        detail: String,
        summary: ImportSummary,
    },
}

impl ImportOutcome {
    /// Completed or Failed; nothing follows a terminal outcome
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportOutcome::Completed { .. } | ImportOutcome::Failed { .. }
        )
    }

    pub fn summary(&self) -> Option<&ImportSummary> {
        match self {
            ImportOutcome::Completed { summary } | ImportOutcome::Failed { summary, .. } => {
                Some(summary)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportOutcome::Progress {
                processed,
                total: Some(total),
                ..
            } => write!(f, "progress: {}/{} rows", processed, total),
            ImportOutcome::Progress { processed, .. } => {
                write!(f, "progress: {} rows", processed)
            }
            ImportOutcome::RowSkipped { row_index, reason } => {
                write!(f, "row {} skipped: {}", row_index, reason)
            }
            ImportOutcome::RowFailed {
                row_index: Some(row),
                error_kind,
                detail,
            } => write!(f, "row {} failed ({}): {}", row, error_kind, detail),
            ImportOutcome::RowFailed {
                row_index: None,
                error_kind,
                detail,
            } => write!(f, "file failed ({}): {}", error_kind, detail),
            ImportOutcome::Completed { summary } => write!(
                f,
                "completed: {} imported, {} skipped ({} duplicates), {} failed, total {}",
                summary.imported_count,
                summary.skipped_count,
                summary.duplicate_count,
                summary.failed_count,
                summary.total_amount
            ),
            ImportOutcome::Failed {
                error_kind, detail, ..
            } => write!(f, "failed ({}): {}", error_kind, detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_event_tag() {
        let outcome = ImportOutcome::RowFailed {
            row_index: Some(4),
            error_kind: ErrorKind::BadAmount,
            detail: "bad amount 'abc'".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["event"], "row_failed");
        assert_eq!(json["error_kind"], "bad_amount");
        assert_eq!(json["row_index"], 4);
    }

    #[test]
    fn test_terminal_outcomes_carry_summary() {
        let done = ImportOutcome::Completed {
            summary: ImportSummary {
                imported_count: 4,
                skipped_count: 1,
                ..ImportSummary::default()
            },
        };
        assert!(done.is_terminal());
        assert_eq!(done.summary().unwrap().processed(), 5);

        let progress = ImportOutcome::Progress {
            processed: 1,
            total: None,
            message: String::new(),
        };
        assert!(!progress.is_terminal());
        assert!(progress.summary().is_none());
        assert_eq!(progress.to_string(), "progress: 1 rows");
    }
}
