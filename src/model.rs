// Canonical Record Model
// Every format converges to CanonicalRecord; RawRow is the parser-side shape

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// MONEY
// ============================================================================

/// ISO 4217 currency code, always upper-case
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse a currency code or one of the common symbols found in exports
    pub fn new(code: &str) -> Option<Self> {
        let code = code.trim();
        let mapped = match code {
            "$" => "USD",
            "€" => "EUR",
            "£" => "GBP",
            "₽" | "руб" | "руб." | "RUR" | "rur" => "RUB",
            "₸" => "KZT",
            other => other,
        };

        if mapped.len() == 3 && mapped.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Currency(mapped.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value).ok_or_else(|| format!("invalid currency code: {}", value))
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// Signed monetary value in a single currency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Money { amount, currency }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Addition is only defined within one currency; `None` on overflow too
    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        let sum = self.amount.checked_add(other.amount)?;
        Some(Money::new(sum, self.currency.clone()))
    }

    /// Parse a bank-formatted amount ("-$855.94", "1 234,56", "(12.00)", "12.50 USD")
    ///
    /// `decimal_separator` is the separator the export uses for the fractional
    /// part; the other one of `.`/`,` is treated as a thousands separator.
    pub fn parse_decimal(raw: &str, decimal_separator: char) -> Option<Decimal> {
        const SYMBOLS: &[char] = &['$', '€', '£', '₽', '¥', '₸', '₴'];

        let mut text: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '−' | '–' | '—' => '-',
                other => other,
            })
            .filter(|c| !SYMBOLS.contains(c))
            .collect();

        let mut negative = false;
        if text.starts_with('(') && text.ends_with(')') {
            negative = true;
            text = text[1..text.len() - 1].to_string();
        }

        // Currency codes around the number ("12.50 USD", "RUB 100", "350,00 руб.")
        let text = text
            .trim_start_matches(|c: char| c.is_alphabetic() || c.is_whitespace())
            .trim_end_matches(|c: char| c.is_alphabetic() || c.is_whitespace() || c == '.');

        let compact: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '\u{a0}' && *c != '\u{202f}')
            .collect();

        if compact.is_empty()
            || !compact
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        {
            return None;
        }

        let mut digits = compact.as_str();
        if let Some(rest) = digits.strip_prefix('-') {
            negative = !negative;
            digits = rest;
        } else if let Some(rest) = digits.strip_prefix('+') {
            digits = rest;
        } else if let Some(rest) = digits.strip_suffix('-') {
            negative = !negative;
            digits = rest;
        }

        if digits.contains(['-', '+']) || !digits.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }

        let normalized = match decimal_separator {
            ',' => digits.replace('.', "").replace(',', "."),
            _ => digits.replace(',', ""),
        };

        let value = Decimal::from_str(&normalized).ok()?;
        Some(if negative { -value } else { value })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Running totals per currency; a statement may mix currencies (Wise, Stripe)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals(BTreeMap<Currency, Decimal>);

impl Totals {
    pub fn new() -> Self {
        Totals(BTreeMap::new())
    }

    fn sum_with(&self, money: &Money) -> Option<Money> {
        let current = self.0.get(&money.currency).copied().unwrap_or(Decimal::ZERO);
        Money::new(current, money.currency.clone()).checked_add(money)
    }

    /// Whether `money` can be added without overflowing its currency's total
    pub fn can_add(&self, money: &Money) -> bool {
        self.sum_with(money).is_some()
    }

    /// Returns the new running total; on overflow returns `None` and leaves totals untouched
    pub fn add(&mut self, money: &Money) -> Option<Money> {
        let sum = self.sum_with(money)?;
        self.0.insert(sum.currency.clone(), sum.amount);
        Some(sum)
    }

    pub fn get(&self, currency: &Currency) -> Option<Money> {
        self.0
            .get(currency)
            .map(|amount| Money::new(*amount, currency.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = Money> + '_ {
        self.0
            .iter()
            .map(|(currency, amount)| Money::new(*amount, currency.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }
        let parts: Vec<String> = self.iter().map(|m| m.to_string()).collect();
        f.write_str(&parts.join(", "))
    }
}

// ============================================================================
// DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Income,
    Expense,
    Transfer,
}

impl Direction {
    /// Infer direction from the sign of the source amount
    pub fn from_sign(amount: Decimal) -> Direction {
        if amount.is_sign_negative() {
            Direction::Expense
        } else {
            Direction::Income
        }
    }

    /// Parse an explicit direction column value
    pub fn parse_token(token: &str) -> Option<Direction> {
        match token.trim().to_lowercase().as_str() {
            "income" | "credit" | "cr" | "in" | "deposit" | "доход" | "пополнение"
            | "зачисление" => Some(Direction::Income),
            "expense" | "debit" | "dr" | "out" | "purchase" | "расход" | "списание"
            | "покупка" => Some(Direction::Expense),
            "transfer" | "payment" | "перевод" => Some(Direction::Transfer),
            _ => None,
        }
    }

    /// Apply the ledger sign convention to a source amount
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Direction::Income => amount.abs(),
            Direction::Expense => -amount.abs(),
            Direction::Transfer => amount,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Income => "income",
            Direction::Expense => "expense",
            Direction::Transfer => "transfer",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Direction::parse_token(s).ok_or_else(|| format!("unknown direction: {}", s))
    }
}

// ============================================================================
// IDENTITY
// ============================================================================

/// Ledger-assigned identity of a persisted record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic dedup key, derived from source fields only
///
/// `ref:` keys come from a natural reference the bank assigns (Wise transfer
/// ID, Stripe txn id); `fp:` keys are a fingerprint of date, amount and
/// counterparty. The row's position in the file never takes part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalKey(String);

impl ExternalKey {
    pub fn natural(format: &str, reference: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}", format, reference.trim()));
        ExternalKey(format!("ref:{:x}", hasher.finalize()))
    }

    pub fn fingerprint(format: &str, date: NaiveDate, amount: &Money, counterparty: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}",
            format,
            date.format("%Y-%m-%d"),
            amount.amount.normalize(),
            amount.currency,
            normalize_counterparty(counterparty)
        ));
        ExternalKey(format!("fp:{:x}", hasher.finalize()))
    }

    /// Rebuild a key read back from storage
    pub fn from_stored(value: String) -> Self {
        ExternalKey(value)
    }

    pub fn is_natural(&self) -> bool {
        self.0.starts_with("ref:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-case, whitespace-collapsed form used for keys and fallback matching
pub fn normalize_counterparty(counterparty: &str) -> String {
    counterparty
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// The normalized transaction every format converges to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Assigned by the ledger on append
    pub id: Option<RecordId>,
    pub occurred_at: NaiveDateTime,
    /// Signed: expenses negative, income positive, transfers as in the source
    pub amount: Money,
    pub direction: Direction,
    pub category: Option<String>,
    pub counterparty: String,
    pub note: Option<String>,
    pub external_key: ExternalKey,
    pub account: String,
    pub source_format: String,
}

impl CanonicalRecord {
    pub fn date(&self) -> NaiveDate {
        self.occurred_at.date()
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

// ============================================================================
// RAW ROW
// ============================================================================

/// RawRow - Output of a format parser, before validation
/// Fields stay as strings; the mapper owns interpretation
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based line (CSV) or element (JSON) index in the source
    pub row_index: usize,

    // Core fields (every parser provides them)
    pub date: String,
    pub amount: String,
    pub description: String,

    // Optional fields (depend on the format)
    pub currency: Option<String>,
    pub counterparty: Option<String>,
    pub category: Option<String>,
    pub direction: Option<String>,
    pub reference: Option<String>,

    /// Set by the parser for rows that are not transactions (declined, pending)
    pub skip_reason: Option<String>,

    // Grammar the mapper needs to interpret the strings
    pub date_patterns: Arc<Vec<String>>,
    pub decimal_separator: char,

    /// Original line for diagnostics
    pub raw_line: String,
}

impl RawRow {
    pub fn new(
        row_index: usize,
        date: String,
        amount: String,
        description: String,
        date_patterns: Arc<Vec<String>>,
        raw_line: String,
    ) -> Self {
        RawRow {
            row_index,
            date,
            amount,
            description,
            currency: None,
            counterparty: None,
            category: None,
            direction: None,
            reference: None,
            skip_reason: None,
            date_patterns,
            decimal_separator: '.',
            raw_line,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = non_empty(currency.into());
        self
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = non_empty(counterparty.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = non_empty(category.into());
        self
    }

    pub fn with_direction(mut self, direction: impl Into<String>) -> Self {
        self.direction = non_empty(direction.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = non_empty(reference.into());
        self
    }

    pub fn with_decimal_separator(mut self, separator: char) -> Self {
        self.decimal_separator = separator;
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
