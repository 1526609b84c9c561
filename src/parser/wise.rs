// Wise (TransferWise) statement export
// Multi-currency: every row carries its own currency, amounts are kept native

use std::io::Read;
use std::sync::Arc;

use super::{
    after_marker, csv_reader, csv_rows, failed, field, opt_field, patterns, raw_line,
    record_line, DirectionClassifier, FormatParser, HeaderIndex, MerchantExtractor, Rows,
};
use crate::detector::Peek;
use crate::model::{Direction, RawRow};

pub struct WiseParser {
    date_patterns: Arc<Vec<String>>,
}

impl WiseParser {
    pub fn new() -> Self {
        WiseParser {
            date_patterns: patterns(&["%d-%m-%Y", "%m/%d/%Y", "%Y-%m-%d", "%d-%m-%Y %H:%M:%S.%3f"]),
        }
    }
}

impl Default for WiseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for WiseParser {
    fn id(&self) -> &'static str {
        "wise"
    }

    fn label(&self) -> &str {
        "Wise"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        peek.header_fields(',')
            .first()
            .map(|f| f == "transferwise id")
            .unwrap_or(false)
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("wise") || name.starts_with("statement_")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        let mut reader = csv_reader(source, b',', true);
        let header = match HeaderIndex::read(&mut reader) {
            Ok(header) => header,
            Err(err) => return failed(err),
        };

        let required = [
            header.require("TransferWise ID", &["transferwise id"]),
            header.require("date", &["date"]),
            header.require("amount", &["amount"]),
            header.require("currency", &["currency"]),
        ];
        let mut columns = Vec::with_capacity(required.len());
        for column in required {
            match column {
                Ok(index) => columns.push(index),
                Err(err) => return failed(err),
            }
        }
        let (id_col, date_col, amount_col, currency_col) =
            (columns[0], columns[1], columns[2], columns[3]);

        let description_col = header.find(&["description"]);
        let payee_col = header.find(&["payee name"]);
        let payer_col = header.find(&["payer name"]);
        let merchant_col = header.find(&["merchant"]);
        let note_col = header.find(&["payment reference", "note"]);

        let date_patterns = self.date_patterns.clone();
        let parser = WiseParser::new();

        csv_rows(reader, move |record| {
            let description = opt_field(record, description_col);

            let counterparty = [merchant_col, payee_col, payer_col]
                .into_iter()
                .map(|col| opt_field(record, col))
                .find(|value| !value.is_empty())
                .or_else(|| parser.extract_merchant(&description));

            let description = match opt_field(record, note_col) {
                note if !note.is_empty() && !description.contains(&note) => {
                    format!("{} ({})", description, note)
                }
                _ => description,
            };

            let mut row = RawRow::new(
                record_line(record),
                field(record, date_col),
                field(record, amount_col),
                description.clone(),
                date_patterns.clone(),
                raw_line(record, ','),
            )
            .with_currency(field(record, currency_col))
            .with_reference(field(record, id_col));

            if let Some(counterparty) = counterparty {
                row = row.with_counterparty(counterparty);
            }
            if let Some(direction) = parser.classify_direction(&description) {
                row = row.with_direction(direction.as_str());
            }
            Some(Ok(row))
        })
    }
}

impl MerchantExtractor for WiseParser {
    fn extract_merchant(&self, description: &str) -> Option<String> {
        // "Payment from Bloom Financial" -> "Bloom Financial"
        // "Sent money to Ana Lopez" -> "Ana Lopez"
        if description.is_empty() {
            return None;
        }

        if let Some(merchant) = after_marker(description, &["from", "to"]) {
            return Some(merchant);
        }

        let first_word = description.split_whitespace().next()?;
        if first_word.len() > 2 {
            Some(first_word.to_string())
        } else {
            None
        }
    }
}

impl DirectionClassifier for WiseParser {
    fn classify_direction(&self, description: &str) -> Option<Direction> {
        let desc_lower = description.to_lowercase();

        // Balance conversions move money between own currency pockets
        if desc_lower.contains("convert") || desc_lower.contains("exchange") {
            return Some(Direction::Transfer);
        }
        None
    }
}
