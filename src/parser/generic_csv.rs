// Configurable CSV format
// Column layout comes from GenericCsvConfig; registered last so bank formats win detection

use std::io::Read;
use std::sync::Arc;

use super::{csv_reader, csv_rows, field, opt_field, raw_line, record_line, FormatParser, Rows};
use crate::config::GenericCsvConfig;
use crate::detector::Peek;
use crate::error::ParseError;
use crate::model::{Direction, RawRow};

pub struct GenericCsvParser {
    config: Arc<GenericCsvConfig>,
    date_patterns: Arc<Vec<String>>,
}

impl GenericCsvParser {
    pub fn new(config: GenericCsvConfig) -> Self {
        let date_patterns = Arc::new(config.date_formats.clone());
        GenericCsvParser {
            config: Arc::new(config),
            date_patterns,
        }
    }

    fn delimiter(&self) -> u8 {
        // validated as ASCII by GenericCsvConfig::validate
        u8::try_from(self.config.delimiter).unwrap_or(b',')
    }
}

impl Default for GenericCsvParser {
    fn default() -> Self {
        Self::new(GenericCsvConfig::default())
    }
}

impl FormatParser for GenericCsvParser {
    fn id(&self) -> &'static str {
        "generic_csv"
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    /// No header signature; the layout is whatever the user configured
    fn sniff_header(&self, _peek: &Peek) -> bool {
        false
    }

    fn sniff_delimiter(&self, peek: &Peek) -> bool {
        peek.consistent_columns(self.config.delimiter, self.config.min_columns)
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.ends_with(".csv") || name.ends_with(".txt")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        let reader = csv_reader(source, self.delimiter(), self.config.has_header);
        let config = self.config.clone();
        let date_patterns = self.date_patterns.clone();

        csv_rows(reader, move |record| {
            let row_index = record_line(record);
            if record.len() < config.min_columns {
                return Some(Err(ParseError::malformed(
                    row_index,
                    format!(
                        "expected at least {} columns, found {}",
                        config.min_columns,
                        record.len()
                    ),
                )));
            }

            let description = field(record, config.description_column);
            let mut row = RawRow::new(
                row_index,
                field(record, config.date_column),
                field(record, config.amount_column),
                description.clone(),
                date_patterns.clone(),
                raw_line(record, config.delimiter),
            )
            .with_decimal_separator(config.decimal_separator)
            .with_currency(opt_field(record, config.currency_column))
            .with_category(opt_field(record, config.category_column));

            let counterparty = opt_field(record, config.counterparty_column);
            row = if counterparty.is_empty() {
                row.with_counterparty(description)
            } else {
                row.with_counterparty(counterparty)
            };

            if let Some(col) = config.expense_column {
                let flag = field(record, col);
                let direction = if flag.eq_ignore_ascii_case(&config.expense_true_value) {
                    Direction::Expense
                } else {
                    Direction::Income
                };
                row = row.with_direction(direction.as_str());
            }

            if let Some(col) = config.status_column {
                let status = field(record, col);
                let accepted = config.valid_statuses.is_empty()
                    || config
                        .valid_statuses
                        .iter()
                        .any(|s| s.eq_ignore_ascii_case(&status));
                if !accepted {
                    row = row.skipped(format!("status '{}' is not a completed transaction", status));
                }
            }

            Some(Ok(row))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(config: GenericCsvConfig, input: &str) -> Vec<Result<RawRow, ParseError>> {
        GenericCsvParser::new(config)
            .parse(Box::new(Cursor::new(input.as_bytes().to_vec())))
            .collect()
    }

    #[test]
    fn test_default_layout() {
        let items = parse(
            GenericCsvConfig::default(),
            "date,description,amount,currency\n\
             2024-03-01,Coffee,-3.50,EUR\n\
             2024-03-02,Salary,2500.00,\n",
        );

        let rows: Vec<RawRow> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_index, 2);
        assert_eq!(rows[0].currency.as_deref(), Some("EUR"));
        assert_eq!(rows[0].counterparty.as_deref(), Some("Coffee"));
        assert_eq!(rows[1].currency, None);
    }

    #[test]
    fn test_short_row_is_malformed_and_parsing_continues() {
        let items = parse(
            GenericCsvConfig::default(),
            "date,description,amount\n\
             2024-03-01,Coffee\n\
             2024-03-02,Tea,-2.00\n",
        );

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap_err().row_index(), Some(2));
        assert!(items[1].is_ok());
    }

    #[test]
    fn test_expense_flag_and_status_columns() {
        let config = GenericCsvConfig {
            delimiter: ';',
            has_header: false,
            currency_column: None,
            expense_column: Some(3),
            expense_true_value: "yes".to_string(),
            status_column: Some(4),
            valid_statuses: vec!["done".to_string()],
            decimal_separator: ',',
            ..GenericCsvConfig::default()
        };
        let items = parse(
            config,
            "01.03.2024;Rent;800,00;yes;DONE\n\
             02.03.2024;Refund;20,00;no;pending\n",
        );

        let rows: Vec<RawRow> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].row_index, 1);
        assert_eq!(rows[0].direction.as_deref(), Some("expense"));
        assert_eq!(rows[0].decimal_separator, ',');
        assert!(rows[0].skip_reason.is_none());
        assert_eq!(rows[1].direction.as_deref(), Some("income"));
        assert!(rows[1].skip_reason.is_some());
    }

    #[test]
    fn test_sniff_by_column_shape() {
        let parser = GenericCsvParser::default();
        let peek = Peek::from_bytes(b"a,b,c\n1,2,3\n4,5,6\n", None);
        assert!(parser.sniff_delimiter(&peek));
        assert!(!parser.sniff_header(&peek));

        let peek = Peek::from_bytes(b"just some prose\nwithout any delimiter\n", None);
        assert!(!parser.sniff_delimiter(&peek));
    }
}
