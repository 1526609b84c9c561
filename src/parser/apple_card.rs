// Apple Card export
// Charges are positive on a credit card statement; the Type column says what they are

use std::io::Read;
use std::sync::Arc;

use super::{
    csv_reader, csv_rows, failed, field, opt_field, patterns, raw_line, record_line,
    DirectionClassifier, FormatParser, HeaderIndex, MerchantExtractor, Rows,
};
use crate::detector::Peek;
use crate::model::{Direction, RawRow};

pub struct AppleCardParser {
    date_patterns: Arc<Vec<String>>,
}

impl AppleCardParser {
    pub fn new() -> Self {
        AppleCardParser {
            date_patterns: patterns(&["%m/%d/%Y", "%Y-%m-%d"]),
        }
    }

    fn direction_for_type(&self, kind: &str, description: &str) -> Direction {
        match kind.trim().to_lowercase().as_str() {
            "purchase" | "installment" | "debit" | "interest" => Direction::Expense,
            "payment" => Direction::Transfer,
            "credit" | "refund" | "daily cash adjustment" => Direction::Income,
            _ => self
                .classify_direction(description)
                .unwrap_or(Direction::Expense),
        }
    }
}

impl Default for AppleCardParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for AppleCardParser {
    fn id(&self) -> &'static str {
        "apple_card"
    }

    fn label(&self) -> &str {
        "Apple Card"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        let fields = peek.header_fields(',');
        let has = |name: &str| fields.iter().any(|f| f == name);

        let full = has("transaction date") && has("clearing date") && has("merchant");
        let short = fields.len() == 5
            && fields[..3] == ["date", "description", "amount"]
            && has("category")
            && has("merchant");
        full || short
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        file_name.to_lowercase().contains("apple")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        let mut reader = csv_reader(source, b',', true);
        let header = match HeaderIndex::read(&mut reader) {
            Ok(header) => header,
            Err(err) => return failed(err),
        };

        let columns = (
            header.require("date", &["transaction date", "date"]),
            header.require("description", &["description"]),
            header.require("amount", &["amount"]),
        );
        let (date_col, description_col, amount_col) = match columns {
            (Ok(d), Ok(desc), Ok(a)) => (d, desc, a),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return failed(e),
        };
        let merchant_col = header.find(&["merchant"]);
        let category_col = header.find(&["category"]);
        let type_col = header.find(&["type"]);

        let date_patterns = self.date_patterns.clone();
        let parser = AppleCardParser::new();

        csv_rows(reader, move |record| {
            let description = field(record, description_col);
            let direction = match type_col {
                Some(col) => parser.direction_for_type(&field(record, col), &description),
                None => parser
                    .classify_direction(&description)
                    .unwrap_or(Direction::Expense),
            };

            let counterparty = match opt_field(record, merchant_col) {
                merchant if !merchant.is_empty() => Some(merchant),
                _ => parser.extract_merchant(&description),
            };

            let mut row = RawRow::new(
                record_line(record),
                field(record, date_col),
                field(record, amount_col),
                description,
                date_patterns.clone(),
                raw_line(record, ','),
            )
            .with_currency("USD")
            .with_category(opt_field(record, category_col))
            .with_direction(direction.as_str());

            if let Some(counterparty) = counterparty {
                row = row.with_counterparty(counterparty);
            }
            Some(Ok(row))
        })
    }
}

impl MerchantExtractor for AppleCardParser {
    fn extract_merchant(&self, description: &str) -> Option<String> {
        // "UBER *EATS MR TREUBLAAN 7 AMSTERDAM..." -> "UBER *EATS"
        let words: Vec<&str> = description.split_whitespace().collect();
        match words.as_slice() {
            [] => None,
            [only] => Some(only.to_string()),
            [first, second, ..] => Some(format!("{} {}", first, second)),
        }
    }
}

impl DirectionClassifier for AppleCardParser {
    fn classify_direction(&self, description: &str) -> Option<Direction> {
        let desc_lower = description.to_lowercase();

        // Payments from the bank settle the card balance
        if desc_lower.contains("ach deposit") || desc_lower.contains("payment") {
            return Some(Direction::Transfer);
        }
        if desc_lower.contains("refund") {
            return Some(Direction::Income);
        }
        None
    }
}
