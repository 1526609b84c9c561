// Bank of America checking export
// Date,Description,Amount[,Running Bal.] with MM/DD/YYYY dates and "-$855.94" amounts

use std::io::Read;
use std::sync::Arc;

use super::{
    csv_reader, csv_rows, field, patterns, raw_line, record_line, DirectionClassifier,
    FormatParser, MerchantExtractor, Rows,
};
use crate::detector::Peek;
use crate::model::{Direction, RawRow};

pub struct BofAParser {
    date_patterns: Arc<Vec<String>>,
}

impl BofAParser {
    pub fn new() -> Self {
        BofAParser {
            date_patterns: patterns(&["%m/%d/%Y"]),
        }
    }
}

impl Default for BofAParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for BofAParser {
    fn id(&self) -> &'static str {
        "bofa"
    }

    fn label(&self) -> &str {
        "Bank of America"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        let fields = peek.header_fields(',');
        if fields.len() < 3 || fields[..3] != ["date", "description", "amount"] {
            return false;
        }
        fields.len() == 3 || fields[3].starts_with("running bal")
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("bofa") || name.contains("bank_of_america") || name.starts_with("stmt")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        let reader = csv_reader(source, b',', true);
        let date_patterns = self.date_patterns.clone();
        let extractor = BofAParser::new();

        csv_rows(reader, move |record| {
            let row_index = record_line(record);
            let description = field(record, 1);
            let amount = field(record, 2);

            let mut row = RawRow::new(
                row_index,
                field(record, 0),
                amount.clone(),
                description.clone(),
                date_patterns.clone(),
                raw_line(record, ','),
            )
            .with_currency("USD");

            if let Some(merchant) = extractor.extract_merchant(&description) {
                row = row.with_counterparty(merchant);
            }
            if let Some(direction) = extractor.classify_direction(&description) {
                row = row.with_direction(direction.as_str());
            }

            // Balance lines carry no amount
            if amount.is_empty() && description.to_lowercase().contains("balance") {
                row = row.skipped("balance line");
            }

            Some(Ok(row))
        })
    }
}

impl MerchantExtractor for BofAParser {
    fn extract_merchant(&self, description: &str) -> Option<String> {
        // "Stripe, Des:transfer, Id:st-..." -> "Stripe"
        // "Wise Us Inc, Des:thera Pay, ..." -> "Wise Us Inc"
        let desc = description.trim();

        if let Some(comma_pos) = desc.find(',') {
            let merchant = desc[..comma_pos].trim();
            if !merchant.is_empty() {
                return Some(merchant.to_string());
            }
        }

        // "Applecard Gsbank Des:payment" -> text before the Des: marker
        if let Some(des_pos) = desc.to_lowercase().find(" des:") {
            let merchant = desc[..des_pos].trim();
            if !merchant.is_empty() {
                return Some(merchant.to_string());
            }
        }

        let first_word = desc.split_whitespace().next()?;
        if first_word.len() > 2 {
            Some(first_word.to_string())
        } else {
            None
        }
    }
}

impl DirectionClassifier for BofAParser {
    fn classify_direction(&self, description: &str) -> Option<Direction> {
        let desc_lower = description.to_lowercase();

        // Card bill payments move money between own accounts
        if desc_lower.contains("credit card") || desc_lower.contains("bill payment") {
            return Some(Direction::Transfer);
        }
        if desc_lower.contains("des:transfer") {
            return Some(Direction::Transfer);
        }
        if desc_lower.contains("deposit") || desc_lower.contains("des:thera pay") {
            return Some(Direction::Income);
        }

        // Everything else follows the sign
        None
    }
}
