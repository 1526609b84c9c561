// SQLite ledger
// Persists canonical records; the unique external_key column backs idempotent re-imports

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::LedgerError;
use crate::ledger::{same_transaction, LedgerRead, LedgerResult, LedgerWrite};
use crate::model::{
    normalize_counterparty, CanonicalRecord, Currency, Direction, ExternalKey, Money, RecordId,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            external_key TEXT UNIQUE NOT NULL,
            occurred_at TEXT NOT NULL,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL,
            direction TEXT NOT NULL,
            category TEXT,
            counterparty TEXT NOT NULL,
            counterparty_norm TEXT NOT NULL,
            note TEXT,
            account TEXT NOT NULL,
            source_format TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_match ON records(account, date, counterparty_norm)",
        [],
    )?;

    Ok(())
}

/// Columns as stored, before they are turned back into domain types
struct StoredRecord {
    id: String,
    external_key: String,
    occurred_at: String,
    amount: String,
    currency: String,
    direction: String,
    category: Option<String>,
    counterparty: String,
    note: Option<String>,
    account: String,
    source_format: String,
}

impl StoredRecord {
    const COLUMNS: &'static str = "id, external_key, occurred_at, amount, currency, direction,
        category, counterparty, note, account, source_format";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredRecord {
            id: row.get(0)?,
            external_key: row.get(1)?,
            occurred_at: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            direction: row.get(5)?,
            category: row.get(6)?,
            counterparty: row.get(7)?,
            note: row.get(8)?,
            account: row.get(9)?,
            source_format: row.get(10)?,
        })
    }

    fn into_record(self) -> LedgerResult<CanonicalRecord> {
        let corrupt = |field: &str, value: &str| {
            LedgerError::Corrupt(format!("record {}: bad {} '{}'", self.id, field, value))
        };

        let occurred_at = NaiveDateTime::parse_from_str(&self.occurred_at, TIMESTAMP_FORMAT)
            .map_err(|_| corrupt("occurred_at", &self.occurred_at))?;
        let amount =
            Decimal::from_str(&self.amount).map_err(|_| corrupt("amount", &self.amount))?;
        let currency =
            Currency::new(&self.currency).ok_or_else(|| corrupt("currency", &self.currency))?;
        let direction = Direction::parse_token(&self.direction)
            .ok_or_else(|| corrupt("direction", &self.direction))?;

        Ok(CanonicalRecord {
            id: Some(RecordId(self.id.clone())),
            occurred_at,
            amount: Money::new(amount, currency),
            direction,
            category: self.category,
            counterparty: self.counterparty,
            note: self.note,
            external_key: ExternalKey::from_stored(self.external_key),
            account: self.account,
            source_format: self.source_format,
        })
    }
}

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        setup_database(&conn).context("Failed to set up database schema")?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteLedger {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> LedgerResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    pub fn count(&self) -> LedgerResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn get(&self, id: &RecordId) -> LedgerResult<Option<CanonicalRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM records WHERE id = ?1", StoredRecord::COLUMNS);
        let stored = conn
            .query_row(&sql, params![id.0], StoredRecord::from_row)
            .optional()?;
        stored.map(StoredRecord::into_record).transpose()
    }

    /// All records of one account, oldest first
    pub fn records_for_account(&self, account: &str) -> LedgerResult<Vec<CanonicalRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM records WHERE account = ?1 ORDER BY occurred_at, rowid",
            StoredRecord::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let stored = stmt
            .query_map(params![account], StoredRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stored.into_iter().map(StoredRecord::into_record).collect()
    }
}

impl LedgerRead for SqliteLedger {
    fn exists(&self, key: &ExternalKey) -> LedgerResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM records WHERE external_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn find(
        &self,
        date: NaiveDate,
        amount: &Money,
        counterparty: &str,
        account: &str,
    ) -> LedgerResult<Option<CanonicalRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM records
             WHERE account = ?1 AND date = ?2 AND currency = ?3 AND counterparty_norm = ?4",
            StoredRecord::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(
                params![
                    account,
                    date.format("%Y-%m-%d").to_string(),
                    amount.currency.code(),
                    normalize_counterparty(counterparty)
                ],
                StoredRecord::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Stored amounts keep their scale, so compare as decimals
        for stored in candidates {
            let record = stored.into_record()?;
            if same_transaction(&record, date, amount, counterparty, account) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl LedgerWrite for SqliteLedger {
    fn append(&self, record: CanonicalRecord) -> LedgerResult<RecordId> {
        let conn = self.conn()?;
        let id = record.id.clone().unwrap_or_else(RecordId::generate);

        let result = conn.execute(
            "INSERT INTO records (
                id, external_key, occurred_at, date, amount, currency, direction,
                category, counterparty, counterparty_norm, note, account, source_format
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id.0,
                record.external_key.as_str(),
                record.occurred_at.format(TIMESTAMP_FORMAT).to_string(),
                record.date().format("%Y-%m-%d").to_string(),
                record.amount.amount.to_string(),
                record.amount.currency.code(),
                record.direction.as_str(),
                record.category,
                record.counterparty,
                normalize_counterparty(&record.counterparty),
                record.note,
                record.account,
                record.source_format,
            ],
        );

        match result {
            Ok(_) => Ok(id),
            // Duplicate external_key (UNIQUE constraint)
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(LedgerError::Conflict(record.external_key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
