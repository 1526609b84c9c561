// Tinkoff card operations export
// ';'-delimited, comma decimals, DD.MM.YYYY HH:MM:SS; FAILED operations are listed too

use std::io::Read;
use std::sync::Arc;

use super::{
    csv_reader, csv_rows, failed, field, opt_field, patterns, raw_line, record_line,
    FormatParser, HeaderIndex, Rows,
};
use crate::detector::Peek;
use crate::model::RawRow;

pub struct TinkoffParser {
    date_patterns: Arc<Vec<String>>,
}

impl TinkoffParser {
    pub fn new() -> Self {
        TinkoffParser {
            date_patterns: patterns(&["%d.%m.%Y %H:%M:%S", "%d.%m.%Y"]),
        }
    }
}

impl Default for TinkoffParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for TinkoffParser {
    fn id(&self) -> &'static str {
        "tinkoff"
    }

    fn label(&self) -> &str {
        "Tinkoff"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        let fields = peek.header_fields(';');
        let has = |name: &str| fields.iter().any(|f| f == name);
        has("дата операции") && has("статус") && (has("номер карты") || has("mcc"))
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("tinkoff") || name.contains("тинькофф") || name.starts_with("operations")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        let mut reader = csv_reader(source, b';', true);
        let header = match HeaderIndex::read(&mut reader) {
            Ok(header) => header,
            Err(err) => return failed(err),
        };

        let (date_col, amount_col) = match (
            header.require("Дата операции", &["дата операции"]),
            header.require("Сумма операции", &["сумма операции", "сумма платежа"]),
        ) {
            (Ok(d), Ok(a)) => (d, a),
            (Err(e), _) | (_, Err(e)) => return failed(e),
        };
        let status_col = header.find(&["статус"]);
        let currency_col = header.find(&["валюта операции", "валюта платежа"]);
        let category_col = header.find(&["категория"]);
        let description_col = header.find(&["описание"]);

        let date_patterns = self.date_patterns.clone();

        csv_rows(reader, move |record| {
            let description = opt_field(record, description_col);
            let currency = match opt_field(record, currency_col) {
                c if c.is_empty() => "RUB".to_string(),
                c => c,
            };

            let row = RawRow::new(
                record_line(record),
                field(record, date_col),
                field(record, amount_col),
                description.clone(),
                date_patterns.clone(),
                raw_line(record, ';'),
            )
            .with_decimal_separator(',')
            .with_currency(currency)
            .with_counterparty(description)
            .with_category(opt_field(record, category_col));

            let status = opt_field(record, status_col);
            if !status.is_empty() && !status.eq_ignore_ascii_case("ok") {
                return Some(Ok(row.skipped(format!("operation status {}", status))));
            }
            Some(Ok(row))
        })
    }
}
