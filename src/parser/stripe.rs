// Stripe balance transactions export
// { "object": "list", "data": [ { "id": "txn_...", "amount": 286770, "created": 1735084800, ... } ] }

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::io::{BufReader, Read};
use std::sync::Arc;

use super::{after_marker, failed, patterns, DirectionClassifier, FormatParser, MerchantExtractor, Rows};
use crate::detector::Peek;
use crate::error::ParseError;
use crate::model::{Direction, RawRow};

/// Currencies Stripe reports in whole units rather than cents
const ZERO_DECIMAL: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

pub struct StripeParser {
    date_patterns: Arc<Vec<String>>,
}

impl StripeParser {
    pub fn new() -> Self {
        StripeParser {
            date_patterns: patterns(&["%Y-%m-%d %H:%M:%S"]),
        }
    }

    fn to_row(&self, index: usize, item: &Value) -> Result<RawRow, ParseError> {
        let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");

        let cents = item
            .get("amount")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ParseError::malformed(index, "missing integer 'amount'"))?;

        let currency = item
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_lowercase();
        let scale = if ZERO_DECIMAL.contains(&currency.as_str()) { 0 } else { 2 };
        let amount = Decimal::new(cents, scale);

        let created = item
            .get("created")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ParseError::malformed(index, "missing unix 'created' timestamp"))?;
        let datetime = DateTime::<Utc>::from_timestamp(created, 0)
            .ok_or_else(|| ParseError::malformed(index, format!("invalid timestamp: {}", created)))?;

        let description = item
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let tx_type = item
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let full_description = if description.is_empty() {
            format!("Stripe {} (ID: {})", tx_type, id)
        } else {
            format!("{} (ID: {})", description, id)
        };

        let raw_line = serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string());

        let mut row = RawRow::new(
            index,
            datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            amount.to_string(),
            full_description,
            self.date_patterns.clone(),
            raw_line,
        )
        .with_currency(currency)
        .with_reference(id)
        .with_category(stripe_category(&tx_type));

        let counterparty = self
            .extract_merchant(&description)
            .unwrap_or_else(|| "Stripe".to_string());
        row = row.with_counterparty(counterparty);

        if let Some(direction) = self.classify_direction(&tx_type) {
            row = row.with_direction(direction.as_str());
        }

        match item.get("status").and_then(|v| v.as_str()) {
            Some(status) if status != "available" && status != "pending" => {
                Ok(row.skipped(format!("balance transaction status '{}'", status)))
            }
            _ => Ok(row),
        }
    }
}

impl Default for StripeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn stripe_category(tx_type: &str) -> &'static str {
    match tx_type {
        "stripe_fee" | "application_fee" | "tax_fee" => "Fees",
        "payout" => "Transfers",
        "refund" | "payment_refund" => "Refunds",
        _ => "",
    }
}

impl FormatParser for StripeParser {
    fn id(&self) -> &'static str {
        "stripe"
    }

    fn label(&self) -> &str {
        "Stripe"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        let text = peek.text();
        text.trim_start().starts_with('{')
            && text.contains("\"data\"")
            && (text.contains("balance_transaction") || text.contains("\"txn_"))
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("stripe") || name.ends_with(".json")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        let json: Value = match serde_json::from_reader(BufReader::new(source)) {
            Ok(json) => json,
            Err(err) if err.is_io() => {
                return failed(ParseError::Io {
                    detail: err.to_string(),
                })
            }
            Err(err) => return failed(ParseError::structure(format!("invalid JSON: {}", err))),
        };

        let data = match json {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => return failed(ParseError::structure("JSON missing 'data' array")),
            },
            _ => return failed(ParseError::structure("JSON root is not an object")),
        };

        let parser = StripeParser::new();
        Box::new(
            data.into_iter()
                .enumerate()
                .map(move |(idx, item)| parser.to_row(idx + 1, &item)),
        )
    }
}

impl MerchantExtractor for StripeParser {
    fn extract_merchant(&self, description: &str) -> Option<String> {
        // "Payment from eugenio Castro Garza" -> "eugenio Castro Garza"
        if description.is_empty() {
            return None;
        }

        after_marker(description, &["from", "to"])
    }
}

impl DirectionClassifier for StripeParser {
    /// Classifies by balance transaction type
    fn classify_direction(&self, tx_type: &str) -> Option<Direction> {
        match tx_type {
            "payout" | "transfer" => Some(Direction::Transfer),
            "charge" | "payment" => Some(Direction::Income),
            "refund" | "payment_refund" | "stripe_fee" | "application_fee" | "adjustment" => {
                Some(Direction::Expense)
            }
            _ => None,
        }
    }
}
