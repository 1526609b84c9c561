// Preamble-led bank statements
// Sberbank, VTB, Gazprombank and Ozon print bank details above the operations
// table; the header is searched for, then the rest is read as CSV

use csv::StringRecord;
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use super::{
    csv_reader, csv_rows, failed, field, opt_field, raw_line, record_line, DirectionClassifier,
    HeaderIndex, Rows,
};
use crate::detector::{HeaderLine, BOM, HEADER_SEARCH_LINES};
use crate::error::ParseError;
use crate::model::{Direction, RawRow};

/// Column names and keywords of one bank's operations table
pub(crate) struct StatementLayout {
    pub is_header: fn(&[String]) -> bool,
    pub date: &'static [&'static str],
    pub amount: &'static [&'static str],
    pub description: &'static [&'static str],
    pub category: &'static [&'static str],
    pub currency: &'static [&'static str],
    /// Operation type column ("Тип операции")
    pub kind: &'static [&'static str],
    pub expense_words: &'static [&'static str],
    pub income_words: &'static [&'static str],
    /// Undated lines containing one of these are totals or balances
    pub summary_markers: &'static [&'static str],
    /// Bank category -> category; unlisted ones pass through unchanged
    pub categories: &'static [(&'static str, &'static str)],
    pub date_patterns: &'static [&'static str],
}

impl StatementLayout {
    fn category_for(&self, raw: &str) -> String {
        let raw = raw.trim();
        let key = raw.to_lowercase();
        self.categories
            .iter()
            .find(|(from, _)| *from == key)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| raw.to_string())
    }

    fn is_summary(&self, line: &str) -> bool {
        let line = line.to_lowercase();
        self.summary_markers.iter().any(|m| line.contains(m))
    }
}

impl DirectionClassifier for StatementLayout {
    fn classify_direction(&self, text: &str) -> Option<Direction> {
        let text = text.to_lowercase();
        if self.expense_words.iter().any(|w| text.contains(w)) {
            Some(Direction::Expense)
        } else if self.income_words.iter().any(|w| text.contains(w)) {
            Some(Direction::Income)
        } else {
            None
        }
    }
}

struct Statement<'a> {
    header: HeaderLine,
    /// Physical lines up to and including the header
    offset: usize,
    reader: csv::Reader<Box<dyn Read + 'a>>,
}

/// Skip the preamble; the reader is left on the first line below the header
fn open<'a>(
    source: Box<dyn Read + 'a>,
    is_header: fn(&[String]) -> bool,
) -> Result<Statement<'a>, ParseError> {
    let mut input = BufReader::new(source);
    let mut preamble: Vec<String> = Vec::new();
    let mut offset = 0;
    let mut buf = Vec::new();

    while preamble.len() < HEADER_SEARCH_LINES {
        buf.clear();
        let read = input
            .read_until(b'\n', &mut buf)
            .map_err(|e| ParseError::Io {
                detail: e.to_string(),
            })?;
        if read == 0 {
            break;
        }
        offset += 1;

        let bytes = if offset == 1 {
            buf.strip_prefix(BOM).unwrap_or(&buf[..])
        } else {
            &buf[..]
        };
        let text = String::from_utf8_lossy(bytes);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }

        let header = HeaderLine::parse(line, &preamble);
        if is_header(&header.fields) {
            let reader = csv_reader(Box::new(input), header.delimiter, false);
            return Ok(Statement {
                header,
                offset,
                reader,
            });
        }
        preamble.push(line.to_lowercase());
    }

    Err(ParseError::structure(format!(
        "no operations table header in the first {} lines",
        HEADER_SEARCH_LINES
    )))
}

/// Rows of a preamble-led statement, amounts in comma decimals, RUB unless a
/// currency column says otherwise
pub(crate) fn statement_rows<'a>(
    source: Box<dyn Read + 'a>,
    layout: &'static StatementLayout,
    date_patterns: Arc<Vec<String>>,
) -> Rows<'a> {
    let Statement {
        header,
        offset,
        reader,
    } = match open(source, layout.is_header) {
        Ok(statement) => statement,
        Err(err) => return failed(err),
    };

    let columns = HeaderIndex::new(&StringRecord::from(header.fields.clone()));
    let (date_col, amount_col) = match (
        columns.require("date", layout.date),
        columns.require("amount", layout.amount),
    ) {
        (Ok(d), Ok(a)) => (d, a),
        (Err(e), _) | (_, Err(e)) => return failed(e),
    };
    let description_col = columns.find(layout.description);
    let category_col = columns.find(layout.category);
    let currency_col = columns.find(layout.currency);
    let kind_col = columns.find(layout.kind);
    let delimiter = char::from(header.delimiter);

    csv_rows(reader, move |record| {
        let row_index = offset + record_line(record);
        let line = raw_line(record, delimiter);
        let date = field(record, date_col);

        if !date.starts_with(|c: char| c.is_ascii_digit()) {
            let fields: Vec<String> = record.iter().map(|f| f.trim().to_lowercase()).collect();
            // Repeated on every printed page
            if (layout.is_header)(&fields) {
                return None;
            }
            if layout.is_summary(&line) {
                let row = RawRow::new(
                    row_index,
                    date,
                    String::new(),
                    String::new(),
                    date_patterns.clone(),
                    line,
                );
                return Some(Ok(row.skipped("statement summary line")));
            }
        }

        let description = opt_field(record, description_col);
        let currency = match opt_field(record, currency_col) {
            c if c.is_empty() => "RUB".to_string(),
            c => c,
        };
        let kind = opt_field(record, kind_col);

        // An explicit type column decides both ways; free text only marks debits
        let direction = if kind.is_empty() {
            layout
                .classify_direction(&line)
                .filter(|d| *d == Direction::Expense)
        } else {
            layout.classify_direction(&kind)
        };

        let mut row = RawRow::new(
            row_index,
            date,
            field(record, amount_col),
            description.clone(),
            date_patterns.clone(),
            line,
        )
        .with_decimal_separator(',')
        .with_currency(currency)
        .with_counterparty(description)
        .with_category(layout.category_for(&opt_field(record, category_col)));

        if let Some(direction) = direction {
            row = row.with_direction(direction.as_str());
        }
        Some(Ok(row))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::patterns;
    use std::io::{self, Cursor};

    fn is_header(fields: &[String]) -> bool {
        fields.iter().any(|f| f == "дата") && fields.iter().any(|f| f == "сумма")
    }

    static LAYOUT: StatementLayout = StatementLayout {
        is_header,
        date: &["дата"],
        amount: &["сумма"],
        description: &["описание"],
        category: &["категория"],
        currency: &["валюта"],
        kind: &["тип"],
        expense_words: &["списание"],
        income_words: &["зачисление"],
        summary_markers: &["итого"],
        categories: &[("супермаркеты", "Groceries")],
        date_patterns: &["%d.%m.%Y"],
    };

    fn rows(input: &str) -> Vec<Result<RawRow, ParseError>> {
        statement_rows(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            &LAYOUT,
            patterns(LAYOUT.date_patterns),
        )
        .collect()
    }

    #[test]
    fn test_preamble_is_skipped_and_lines_counted() {
        let items = rows(
            "Банк\n\nВыписка за декабрь\nДата;Сумма;Описание;Категория;Тип\n\
             31.12.2024;-1 250,00;Пятёрочка;Супермаркеты;\n\
             30.12.2024;500,00;Иван;;Зачисление\n\
             Итого;-750,00;;;\n",
        );
        let rows: Vec<RawRow> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);

        // Header sits on physical line 4
        assert_eq!(rows[0].row_index, 5);
        assert_eq!(rows[0].amount, "-1 250,00");
        assert_eq!(rows[0].currency.as_deref(), Some("RUB"));
        assert_eq!(rows[0].category.as_deref(), Some("Groceries"));
        assert_eq!(rows[0].direction, None);

        assert_eq!(rows[1].direction.as_deref(), Some("income"));
        assert!(rows[2].skip_reason.is_some());
        assert_eq!(rows[2].row_index, 7);
    }

    #[test]
    fn test_tab_delimited_table_and_repeated_header() {
        let items = rows(
            "Дата\tСумма\tОписание\n01.12.2024\t-10,00\tСписание за связь\n\
             Дата\tСумма\tОписание\n02.12.2024\t20,00\tЗачисление возврата\n",
        );
        let rows: Vec<RawRow> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].direction.as_deref(), Some("expense"));
        assert_eq!(rows[1].row_index, 4);
        // Income words in free text are left to the sign
        assert_eq!(rows[1].direction, None);
    }

    #[test]
    fn test_missing_header_is_structural() {
        let mut text = String::new();
        for i in 0..HEADER_SEARCH_LINES {
            text.push_str(&format!("Строка {}\n", i));
        }
        text.push_str("Дата;Сумма\n01.12.2024;1,00\n");

        let items = rows(&text);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ParseError::Structure { .. })));
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn test_preamble_read_failure_is_io() {
        let items: Vec<_> =
            statement_rows(Box::new(BrokenReader), &LAYOUT, patterns(LAYOUT.date_patterns))
                .collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap_err().is_io());
    }
}
