// Deduplication against the ledger
// Two strategies: external key, then exact date + amount + counterparty for fingerprinted rows

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LedgerError;
use crate::ledger::LedgerRead;
use crate::model::CanonicalRecord;

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateReason {
    /// The ledger already holds a record with this external key
    ExternalKey(String),

    /// Same date, amount and counterparty in the same account
    ExactMatch {
        date: String,
        amount: String,
        counterparty: String,
    },
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::ExternalKey(key) => {
                let short: String = key.chars().take(16).collect();
                write!(f, "duplicate: external key {} already imported", short)
            }
            DuplicateReason::ExactMatch {
                date,
                amount,
                counterparty,
            } => write!(
                f,
                "duplicate: exact match {} | {} | {}",
                date, amount, counterparty
            ),
        }
    }
}

// ============================================================================
// DEDUPLICATOR
// ============================================================================

pub struct Deduplicator {
    /// Also match on date + amount + counterparty when the key is a fingerprint
    pub fallback_match: bool,
}

impl Deduplicator {
    pub fn new(fallback_match: bool) -> Self {
        Deduplicator { fallback_match }
    }

    /// `Ok(None)` means the record is new; read failures are returned as-is
    pub fn is_duplicate<L: LedgerRead + ?Sized>(
        &self,
        record: &CanonicalRecord,
        ledger: &L,
    ) -> Result<Option<DuplicateReason>, LedgerError> {
        if ledger.exists(&record.external_key)? {
            return Ok(Some(DuplicateReason::ExternalKey(
                record.external_key.to_string(),
            )));
        }

        // Natural references are authoritative
        if !self.fallback_match || record.external_key.is_natural() {
            return Ok(None);
        }

        let found = ledger.find(
            record.date(),
            &record.amount,
            &record.counterparty,
            &record.account,
        )?;

        Ok(found.map(|existing| DuplicateReason::ExactMatch {
            date: existing.date().format("%Y-%m-%d").to_string(),
            amount: existing.amount.to_string(),
            counterparty: existing.counterparty,
        }))
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerResult, LedgerWrite, MemoryLedger};
    use crate::model::{Currency, Direction, ExternalKey, Money};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn create_test_record(cents: i64, counterparty: &str, key: ExternalKey) -> CanonicalRecord {
        let date = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        CanonicalRecord {
            id: None,
            occurred_at: date.and_hms_opt(0, 0, 0).unwrap(),
            amount: Money::new(Decimal::new(cents, 2), Currency::new("USD").unwrap()),
            direction: Direction::Expense,
            category: None,
            counterparty: counterparty.to_string(),
            note: None,
            external_key: key,
            account: "main".to_string(),
            source_format: "bofa".to_string(),
        }
    }

    fn fingerprint(cents: i64, counterparty: &str) -> ExternalKey {
        let date = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let amount = Money::new(Decimal::new(cents, 2), Currency::new("USD").unwrap());
        ExternalKey::fingerprint("bofa", date, &amount, counterparty)
    }

    #[test]
    fn test_same_key_is_duplicate() {
        let ledger = MemoryLedger::new();
        let record = create_test_record(-4599, "Starbucks", fingerprint(-4599, "Starbucks"));
        ledger.append(record.clone()).unwrap();

        let reason = Deduplicator::new(false).is_duplicate(&record, &ledger).unwrap();
        assert!(matches!(reason, Some(DuplicateReason::ExternalKey(_))));
    }

    #[test]
    fn test_fallback_matches_across_formats() {
        let ledger = MemoryLedger::new();
        ledger
            .append(create_test_record(-4599, "Starbucks", fingerprint(-4599, "Starbucks")))
            .unwrap();

        // Same transaction exported by another bank: different key, same facts
        let other_key = ExternalKey::fingerprint(
            "apple_card",
            NaiveDate::from_ymd_opt(2024, 12, 25).unwrap(),
            &Money::new(Decimal::new(-4599, 2), Currency::new("USD").unwrap()),
            "Starbucks",
        );
        let candidate = create_test_record(-4599, "STARBUCKS", other_key);

        let reason = Deduplicator::new(true).is_duplicate(&candidate, &ledger).unwrap();
        assert!(matches!(reason, Some(DuplicateReason::ExactMatch { .. })));
        assert_eq!(
            Deduplicator::new(false).is_duplicate(&candidate, &ledger).unwrap(),
            None
        );
    }

    #[test]
    fn test_natural_keys_skip_fallback() {
        let ledger = MemoryLedger::new();
        ledger
            .append(create_test_record(-10000, "Ana", ExternalKey::natural("wise", "T-1")))
            .unwrap();

        let second_transfer = create_test_record(-10000, "Ana", ExternalKey::natural("wise", "T-2"));
        assert_eq!(
            Deduplicator::new(true).is_duplicate(&second_transfer, &ledger).unwrap(),
            None
        );
    }

    #[test]
    fn test_no_match_different_amounts() {
        let ledger = MemoryLedger::new();
        ledger
            .append(create_test_record(-4599, "Starbucks", fingerprint(-4599, "Starbucks")))
            .unwrap();

        let candidate = create_test_record(-5000, "Starbucks", fingerprint(-5000, "Starbucks"));
        assert_eq!(Deduplicator::default().is_duplicate(&candidate, &ledger).unwrap(), None);
    }

    struct BrokenLedger;

    impl LedgerRead for BrokenLedger {
        fn exists(&self, _key: &ExternalKey) -> LedgerResult<bool> {
            Err(LedgerError::Unavailable("disk gone".to_string()))
        }

        fn find(
            &self,
            _date: NaiveDate,
            _amount: &Money,
            _counterparty: &str,
            _account: &str,
        ) -> LedgerResult<Option<CanonicalRecord>> {
            Ok(None)
        }
    }

    #[test]
    fn test_read_failure_propagates() {
        let record = create_test_record(-100, "x", fingerprint(-100, "x"));
        assert!(Deduplicator::default().is_duplicate(&record, &BrokenLedger).is_err());
    }
}
