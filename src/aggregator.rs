// Result Aggregator
// Folds per-row results into counters, the diagnostic log and the terminal outcome

use crate::error::ErrorKind;
use crate::model::{Money, Totals};
use crate::outcome::{ImportOutcome, ImportSummary};

#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    bank_label: String,
    imported: usize,
    skipped: usize,
    failed: usize,
    duplicates: usize,
    total: Totals,
    log: Vec<String>,
}

impl ResultAggregator {
    pub fn new(bank_label: impl Into<String>) -> Self {
        ResultAggregator {
            bank_label: bank_label.into(),
            ..Self::default()
        }
    }

    pub fn set_bank_label(&mut self, bank_label: impl Into<String>) {
        self.bank_label = bank_label.into();
    }

    /// Rows accounted for so far
    pub fn processed(&self) -> usize {
        self.imported + self.skipped + self.failed
    }

    /// Whether `amount` still fits the running total
    pub fn fits_total(&self, amount: &Money) -> bool {
        self.total.can_add(amount)
    }

    pub fn record_imported(&mut self, amount: &Money) {
        self.imported += 1;
        if self.total.add(amount).is_none() {
            tracing::warn!(amount = %amount, "running total overflow; amount left out of the total");
        }
    }

    /// Non-transaction row (declined, balance line)
    pub fn record_skipped(&mut self, row_index: usize, reason: String) -> ImportOutcome {
        self.skipped += 1;
        self.log.push(format!("row {}: skipped: {}", row_index, reason));
        ImportOutcome::RowSkipped { row_index, reason }
    }

    pub fn record_duplicate(&mut self, row_index: usize, reason: String) -> ImportOutcome {
        self.duplicates += 1;
        self.record_skipped(row_index, reason)
    }

    /// Row that parsed but did not validate; counted as skipped
    pub fn record_invalid(
        &mut self,
        row_index: usize,
        error_kind: ErrorKind,
        detail: String,
    ) -> ImportOutcome {
        self.skipped += 1;
        self.log
            .push(format!("row {}: {}: {}", row_index, error_kind, detail));
        ImportOutcome::RowFailed {
            row_index: Some(row_index),
            error_kind,
            detail,
        }
    }

    /// Row (or file structure) the parser could not read; counted as failed
    pub fn record_parse_failure(&mut self, row_index: Option<usize>, detail: String) -> ImportOutcome {
        self.failed += 1;
        let location = match row_index {
            Some(row) => format!("row {}", row),
            None => "file".to_string(),
        };
        self.log
            .push(format!("{}: {}: {}", location, ErrorKind::ParseError, detail));
        ImportOutcome::RowFailed {
            row_index,
            error_kind: ErrorKind::ParseError,
            detail,
        }
    }

    fn summary(&self, closing_line: String) -> ImportSummary {
        let mut log = self.log.clone();
        log.push(closing_line);
        ImportSummary {
            imported_count: self.imported,
            skipped_count: self.skipped,
            failed_count: self.failed,
            duplicate_count: self.duplicates,
            total_amount: self.total.clone(),
            bank_label: self.bank_label.clone(),
            log,
        }
    }

    fn counters_line(&self) -> String {
        format!(
            "{}: imported {}, skipped {} ({} duplicates), failed {}, total {}",
            if self.bank_label.is_empty() {
                "unknown format"
            } else {
                self.bank_label.as_str()
            },
            self.imported,
            self.skipped,
            self.duplicates,
            self.failed,
            self.total
        )
    }

    pub fn completed(&self) -> ImportOutcome {
        ImportOutcome::Completed {
            summary: self.summary(self.counters_line()),
        }
    }

    pub fn failed(&self, error_kind: ErrorKind, detail: String) -> ImportOutcome {
        let closing = format!("{} | aborted ({}): {}", self.counters_line(), error_kind, detail);
        ImportOutcome::Failed {
            error_kind,
            detail,
            summary: self.summary(closing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Currency;
    use rust_decimal::Decimal;

    #[test]
    fn test_counts_and_log_in_encounter_order() {
        let usd = Currency::new("USD").unwrap();
        let mut agg = ResultAggregator::new("Bank of America");

        agg.record_imported(&Money::new(Decimal::new(-459, 2), usd.clone()));
        agg.record_invalid(3, ErrorKind::BadAmount, "bad amount 'abc'".to_string());
        agg.record_duplicate(4, "duplicate: external key".to_string());
        agg.record_parse_failure(Some(5), "unterminated quote".to_string());
        agg.record_imported(&Money::new(Decimal::new(1000, 2), usd.clone()));

        assert_eq!(agg.processed(), 5);

        let outcome = agg.completed();
        let summary = outcome.summary().unwrap();
        assert_eq!(summary.imported_count, 2);
        assert_eq!(summary.skipped_count, 2);
        assert_eq!(summary.duplicate_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.total_amount.get(&usd).unwrap().amount, Decimal::new(541, 2));

        assert_eq!(summary.log.len(), 4);
        assert!(summary.log[0].starts_with("row 3: bad_amount"));
        assert!(summary.log[1].starts_with("row 4: skipped"));
        assert!(summary.log[2].starts_with("row 5: parse_error"));
        assert!(summary.log[3].starts_with("Bank of America: imported 2"));
    }

    #[test]
    fn test_failed_outcome_keeps_partial_counts() {
        let mut agg = ResultAggregator::new("Wise");
        agg.record_imported(&Money::new(Decimal::ONE, Currency::new("EUR").unwrap()));

        match agg.failed(ErrorKind::LedgerWriteFailure, "disk full".to_string()) {
            ImportOutcome::Failed {
                error_kind,
                summary,
                ..
            } => {
                assert_eq!(error_kind, ErrorKind::LedgerWriteFailure);
                assert_eq!(summary.imported_count, 1);
                assert!(summary.log.last().unwrap().contains("disk full"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_total_headroom() {
        let usd = Currency::new("USD").unwrap();
        let huge: Decimal = "50000000000000000000000000000".parse().unwrap();
        let mut agg = ResultAggregator::new("");
        agg.set_bank_label("Bank of America");

        assert!(agg.fits_total(&Money::new(huge, usd.clone())));
        agg.record_imported(&Money::new(huge, usd.clone()));
        assert!(!agg.fits_total(&Money::new(huge, usd.clone())));
        assert!(agg.fits_total(&Money::new(-huge, usd)));

        let summary = agg.completed().summary().cloned().unwrap();
        assert_eq!(summary.bank_label, "Bank of America");
        assert_eq!(summary.imported_count, 1);
    }
}
