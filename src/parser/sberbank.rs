// Sberbank card statement export
// Bank preamble, then "Дата операции;Дата проводки;Номер карты;Операция;Сумма в валюте счёта;Категория;MCC;Описание"

use std::io::Read;
use std::sync::Arc;

use super::statement::{statement_rows, StatementLayout};
use super::{patterns, FormatParser, Rows};
use crate::detector::Peek;

const MARKERS: &[&str] = &["сбербанк", "сбер банк", "sberbank"];

fn is_header(fields: &[String]) -> bool {
    fields.iter().any(|f| f == "дата операции")
        && fields
            .iter()
            .any(|f| f.starts_with("сумма") || f == "категория")
}

static LAYOUT: StatementLayout = StatementLayout {
    is_header,
    date: &["дата операции"],
    amount: &[
        "сумма в валюте счёта",
        "сумма в валюте счета",
        "сумма в валюте операции",
        "сумма",
    ],
    description: &["описание", "операция"],
    category: &["категория"],
    currency: &["валюта"],
    kind: &[],
    expense_words: &[],
    income_words: &[],
    summary_markers: &["итого по операциям", "итоговая сумма", "баланс"],
    categories: &[
        ("супермаркеты", "Groceries"),
        ("рестораны", "Restaurants"),
        ("рестораны и кафе", "Restaurants"),
        ("транспорт", "Transport"),
        ("одежда и обувь", "Clothing"),
        ("здоровье и красота", "Health"),
        ("жкх и домашние телефоны", "Utilities"),
        ("мобильная связь", "Mobile"),
        ("интернет и тв", "Internet"),
        ("наличные", "Cash"),
        ("перевод", "Transfers"),
        ("переводы", "Transfers"),
        ("зарплата", "Salary"),
    ],
    date_patterns: &["%d.%m.%Y", "%d.%m.%Y %H:%M"],
};

pub struct SberbankParser {
    date_patterns: Arc<Vec<String>>,
}

impl SberbankParser {
    pub fn new() -> Self {
        SberbankParser {
            date_patterns: patterns(LAYOUT.date_patterns),
        }
    }
}

impl Default for SberbankParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for SberbankParser {
    fn id(&self) -> &'static str {
        "sberbank"
    }

    fn label(&self) -> &str {
        "Sberbank"
    }

    /// Bank name above the table, or a bare table with a posting-date column
    fn sniff_header(&self, peek: &Peek) -> bool {
        peek.find_header(is_header).is_some_and(|header| {
            header.mentions(MARKERS)
                || (header.preamble.is_empty()
                    && header.fields.iter().any(|f| f == "дата проводки"))
        })
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("sber") || name.contains("сбер")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        statement_rows(source, &LAYOUT, self.date_patterns.clone())
    }
}
