// Ledger capabilities consumed by the pipeline
// The pipeline only reads through LedgerRead and writes through LedgerWrite

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::error::LedgerError;
use crate::model::{normalize_counterparty, CanonicalRecord, ExternalKey, Money, RecordId};

pub type LedgerResult<T> = Result<T, LedgerError>;

pub trait LedgerRead: Send + Sync {
    fn exists(&self, key: &ExternalKey) -> LedgerResult<bool>;

    /// Record with the same date, amount and counterparty in `account`
    fn find(
        &self,
        date: NaiveDate,
        amount: &Money,
        counterparty: &str,
        account: &str,
    ) -> LedgerResult<Option<CanonicalRecord>>;
}

pub trait LedgerWrite: Send + Sync {
    /// Persist one record; a record with the same external key is a `Conflict`
    fn append(&self, record: CanonicalRecord) -> LedgerResult<RecordId>;
}

/// Both capabilities behind one object
pub trait Ledger: LedgerRead + LedgerWrite {}

impl<T: LedgerRead + LedgerWrite> Ledger for T {}

/// Same date, amount (scale-insensitive) and counterparty (normalized)
pub(crate) fn same_transaction(
    record: &CanonicalRecord,
    date: NaiveDate,
    amount: &Money,
    counterparty: &str,
    account: &str,
) -> bool {
    record.account == account
        && record.date() == date
        && record.amount.currency == amount.currency
        && record.amount.amount.normalize() == amount.amount.normalize()
        && normalize_counterparty(&record.counterparty) == normalize_counterparty(counterparty)
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<CanonicalRecord>,
    keys: HashSet<ExternalKey>,
}

/// In-memory ledger for tests and embedding; clones share the same records
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of persisted records in append order
    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.state
            .read()
            .map(|state| state.records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            state.records.clear();
            state.keys.clear();
        }
    }
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Unavailable("memory ledger lock poisoned".to_string())
}

impl LedgerRead for MemoryLedger {
    fn exists(&self, key: &ExternalKey) -> LedgerResult<bool> {
        Ok(self.state.read().map_err(poisoned)?.keys.contains(key))
    }

    fn find(
        &self,
        date: NaiveDate,
        amount: &Money,
        counterparty: &str,
        account: &str,
    ) -> LedgerResult<Option<CanonicalRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .records
            .iter()
            .find(|r| same_transaction(r, date, amount, counterparty, account))
            .cloned())
    }
}

impl LedgerWrite for MemoryLedger {
    fn append(&self, record: CanonicalRecord) -> LedgerResult<RecordId> {
        let mut state = self.state.write().map_err(poisoned)?;
        if state.keys.contains(&record.external_key) {
            return Err(LedgerError::Conflict(record.external_key.to_string()));
        }

        let id = RecordId::generate();
        state.keys.insert(record.external_key.clone());
        state.records.push(record.with_id(id.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Currency, Direction};
    use rust_decimal::Decimal;

    fn record(counterparty: &str, cents: i64) -> CanonicalRecord {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let amount = Money::new(Decimal::new(cents, 2), Currency::new("USD").unwrap());
        CanonicalRecord {
            id: None,
            occurred_at: date.and_hms_opt(0, 0, 0).unwrap(),
            external_key: ExternalKey::fingerprint("bofa", date, &amount, counterparty),
            amount,
            direction: Direction::Expense,
            category: None,
            counterparty: counterparty.to_string(),
            note: None,
            account: "main".to_string(),
            source_format: "bofa".to_string(),
        }
    }

    #[test]
    fn test_append_assigns_id_and_rejects_same_key() {
        let ledger = MemoryLedger::new();
        let id = ledger.append(record("Starbucks", -459)).unwrap();

        assert_eq!(ledger.records()[0].id.as_ref(), Some(&id));
        assert!(matches!(
            ledger.append(record("Starbucks", -459)),
            Err(LedgerError::Conflict(_))
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_find_matches_normalized_fields() {
        let ledger = MemoryLedger::new();
        let stored = record("Starbucks  Coffee", -459);
        let key = stored.external_key.clone();
        ledger.append(stored).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let amount = Money::new(Decimal::new(-4590, 3), Currency::new("USD").unwrap());

        assert!(ledger.exists(&key).unwrap());
        assert!(ledger.find(date, &amount, "starbucks coffee", "main").unwrap().is_some());
        assert!(ledger.find(date, &amount, "starbucks coffee", "savings").unwrap().is_none());
    }

    #[test]
    fn test_clones_share_records() {
        let ledger = MemoryLedger::new();
        let view = ledger.clone();
        ledger.append(record("Tea", -200)).unwrap();
        assert_eq!(view.len(), 1);

        view.clear();
        assert!(ledger.is_empty());
    }
}
