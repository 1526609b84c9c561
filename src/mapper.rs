// Row Validator & Mapper
// RawRow -> CanonicalRecord, or the reason the row cannot be imported

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;

use crate::error::{ConfigError, ValidationError};
use crate::config::ImportConfig;
use crate::model::{CanonicalRecord, Currency, Direction, ExternalKey, Money, RawRow};
use crate::rules::RuleEngine;

pub struct RowMapper {
    format_id: &'static str,
    format_label: String,
    account: String,
    default_currency: Currency,
    max_future_days: i64,
    /// Last acceptable date; `None` when the window reaches past the calendar
    latest: Option<NaiveDate>,
    rules: Arc<RuleEngine>,
}

impl RowMapper {
    pub fn new(
        format_id: &'static str,
        format_label: &str,
        config: &ImportConfig,
        rules: Arc<RuleEngine>,
        today: NaiveDate,
    ) -> Result<Self, ConfigError> {
        Ok(RowMapper {
            format_id,
            format_label: format_label.to_string(),
            account: config.account.clone(),
            default_currency: config.currency()?,
            max_future_days: config.max_future_days,
            latest: Duration::try_days(config.max_future_days)
                .and_then(|window| today.checked_add_signed(window)),
            rules,
        })
    }

    pub fn map(&self, row: &RawRow) -> Result<CanonicalRecord, ValidationError> {
        let occurred_at = self.parse_date(row)?;
        let value = self.parse_amount(row)?;
        let currency = self.parse_currency(row)?;

        let counterparty = row
            .counterparty
            .clone()
            .or_else(|| Some(row.description.trim().to_string()).filter(|d| !d.is_empty()))
            .unwrap_or_else(|| self.format_label.clone());

        let texts = [row.description.as_str(), counterparty.as_str()];
        let rule = self.rules.classify(&texts);

        let direction = match row.direction.as_deref() {
            Some(token) => Direction::parse_token(token).ok_or_else(|| {
                ValidationError::Unrecognized {
                    field: "direction",
                    value: token.to_string(),
                }
            })?,
            None => rule
                .as_ref()
                .and_then(|r| r.direction)
                .unwrap_or_else(|| Direction::from_sign(value)),
        };

        let amount = Money::new(direction.signed(value), currency);

        let category = row
            .category
            .clone()
            .or_else(|| rule.map(|r| r.category));

        let note = Some(row.description.trim().to_string())
            .filter(|d| !d.is_empty() && *d != counterparty);

        let external_key = match row.reference.as_deref() {
            Some(reference) => ExternalKey::natural(self.format_id, reference),
            None => {
                ExternalKey::fingerprint(self.format_id, occurred_at.date(), &amount, &counterparty)
            }
        };

        Ok(CanonicalRecord {
            id: None,
            occurred_at,
            amount,
            direction,
            category,
            counterparty,
            note,
            external_key,
            account: self.account.clone(),
            source_format: self.format_id.to_string(),
        })
    }

    fn parse_date(&self, row: &RawRow) -> Result<NaiveDateTime, ValidationError> {
        let raw = row.date.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingRequiredField("date"));
        }

        let parsed = row.date_patterns.iter().find_map(|pattern| {
            NaiveDateTime::parse_from_str(raw, pattern).ok().or_else(|| {
                NaiveDate::parse_from_str(raw, pattern)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
        });

        let occurred_at = parsed.ok_or_else(|| ValidationError::BadDate {
            value: raw.to_string(),
            reason: format!("expected one of {}", row.date_patterns.join(", ")),
        })?;

        if self.latest.is_some_and(|latest| occurred_at.date() > latest) {
            return Err(ValidationError::BadDate {
                value: raw.to_string(),
                reason: format!("more than {} day(s) in the future", self.max_future_days),
            });
        }
        Ok(occurred_at)
    }

    fn parse_amount(&self, row: &RawRow) -> Result<rust_decimal::Decimal, ValidationError> {
        let raw = row.amount.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingRequiredField("amount"));
        }

        match Money::parse_decimal(raw, row.decimal_separator) {
            Some(value) if !value.is_zero() => Ok(value),
            _ => Err(ValidationError::BadAmount(raw.to_string())),
        }
    }

    fn parse_currency(&self, row: &RawRow) -> Result<Currency, ValidationError> {
        match row.currency.as_deref() {
            None => Ok(self.default_currency.clone()),
            Some(code) => Currency::new(code).ok_or_else(|| ValidationError::Unrecognized {
                field: "currency",
                value: code.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::parser::patterns;
    use rust_decimal::Decimal;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn mapper() -> RowMapper {
        RowMapper::new(
            "bofa",
            "Bank of America",
            &ImportConfig::default(),
            Arc::new(RuleEngine::builtin()),
            today(),
        )
        .unwrap()
    }

    fn row(date: &str, amount: &str, description: &str) -> RawRow {
        RawRow::new(
            2,
            date.to_string(),
            amount.to_string(),
            description.to_string(),
            patterns(&["%m/%d/%Y", "%d.%m.%Y %H:%M:%S"]),
            format!("{},{},{}", date, description, amount),
        )
    }

    #[test]
    fn test_maps_expense_by_sign() {
        let record = mapper()
            .map(&row("12/31/2024", "-$855.94", "STARBUCKS STORE 1234").with_counterparty("STARBUCKS"))
            .unwrap();

        assert_eq!(record.direction, Direction::Expense);
        assert_eq!(record.amount.amount, Decimal::new(-85594, 2));
        assert_eq!(record.amount.currency.code(), "USD");
        assert_eq!(record.category.as_deref(), Some("Restaurants"));
        assert_eq!(record.counterparty, "STARBUCKS");
        assert_eq!(record.note.as_deref(), Some("STARBUCKS STORE 1234"));
        assert_eq!(record.account, "main");
        assert!(!record.external_key.is_natural());
    }

    #[test]
    fn test_explicit_direction_sets_sign() {
        let record = mapper()
            .map(&row("10/26/2024", "3.74", "UBER *EATS").with_direction("expense"))
            .unwrap();
        assert_eq!(record.amount.amount, Decimal::new(-374, 2));

        let err = mapper()
            .map(&row("10/26/2024", "3.74", "x").with_direction("sideways"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unrecognized);
    }

    #[test]
    fn test_rule_direction_applies_without_explicit_column() {
        let record = mapper()
            .map(&row("12/31/2024", "-855.94", "Stripe, Des:transfer, Id:st-1"))
            .unwrap();
        assert_eq!(record.direction, Direction::Transfer);
        assert_eq!(record.amount.amount, Decimal::new(-85594, 2));
        assert_eq!(record.category.as_deref(), Some("Transfers"));
    }

    #[test]
    fn test_bad_amounts() {
        let m = mapper();
        assert_eq!(
            m.map(&row("12/31/2024", "abc", "x")).unwrap_err().kind(),
            ErrorKind::BadAmount
        );
        assert_eq!(
            m.map(&row("12/31/2024", "0.00", "x")).unwrap_err().kind(),
            ErrorKind::BadAmount
        );
        assert_eq!(
            m.map(&row("12/31/2024", "", "x")).unwrap_err(),
            ValidationError::MissingRequiredField("amount")
        );
    }

    #[test]
    fn test_bad_dates() {
        let m = mapper();
        assert_eq!(m.map(&row("31/12/2024", "1", "x")).unwrap_err().kind(), ErrorKind::BadDate);
        assert_eq!(m.map(&row("02/30/2024", "1", "x")).unwrap_err().kind(), ErrorKind::BadDate);
        assert_eq!(
            m.map(&row("", "1", "x")).unwrap_err(),
            ValidationError::MissingRequiredField("date")
        );

        // today + 1 is tolerated, today + 2 is not
        assert!(m.map(&row("01/16/2025", "1", "x")).is_ok());
        assert_eq!(m.map(&row("01/17/2025", "1", "x")).unwrap_err().kind(), ErrorKind::BadDate);
    }

    #[test]
    fn test_huge_future_window_does_not_overflow() {
        for max_future_days in [i64::MAX, 400_000_000, 5_000_000] {
            let config = ImportConfig {
                max_future_days,
                ..ImportConfig::default()
            };
            let rules = Arc::new(RuleEngine::builtin());
            let m = RowMapper::new("bofa", "Bank of America", &config, rules, today()).unwrap();
            assert!(m.map(&row("12/31/2099", "1", "x")).is_ok());
        }
    }

    #[test]
    fn test_datetime_pattern_keeps_time() {
        let record = mapper()
            .map(&row("31.12.2024 14:05:33", "-1 250,00", "Пятёрочка").with_decimal_separator(','))
            .unwrap();
        assert_eq!(record.occurred_at.format("%H:%M").to_string(), "14:05");
        assert_eq!(record.amount.amount, Decimal::new(-125000, 2));
    }

    #[test]
    fn test_currency_handling() {
        let m = mapper();
        let record = m.map(&row("12/31/2024", "5", "x").with_currency("eur")).unwrap();
        assert_eq!(record.amount.currency.code(), "EUR");

        let err = m.map(&row("12/31/2024", "5", "x").with_currency("euros")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unrecognized);
    }

    #[test]
    fn test_key_ignores_row_position() {
        let m = mapper();
        let a = m.map(&row("12/31/2024", "-5.00", "Coffee")).unwrap();
        let mut moved = row("12/31/2024", "-5.0", "coffee");
        moved.row_index = 40;
        let b = m.map(&moved).unwrap();
        assert_eq!(a.external_key, b.external_key);

        let natural = m.map(&row("12/31/2024", "-5.00", "Coffee").with_reference("TX-1")).unwrap();
        assert!(natural.external_key.is_natural());
    }
}
