// Ozon Bank statement export
// Bank preamble, then a ';' table; purchases and top-ups are named in the text

use std::io::Read;
use std::sync::Arc;

use super::statement::{statement_rows, StatementLayout};
use super::{patterns, FormatParser, Rows};
use crate::detector::Peek;

const MARKERS: &[&str] = &["озон", "ozon"];

fn is_header(fields: &[String]) -> bool {
    let has = |word: &str| fields.iter().any(|f| f.contains(word));
    has("дата операции") || has("дата платежа") || (has("сумма") && has("описание"))
}

static LAYOUT: StatementLayout = StatementLayout {
    is_header,
    date: &["дата операции", "дата платежа", "дата"],
    amount: &["сумма операции", "сумма платежа", "сумма"],
    description: &["описание", "назначение платежа", "назначение"],
    category: &["категория"],
    currency: &["валюта"],
    kind: &["тип операции", "тип"],
    expense_words: &["списание", "покупка"],
    income_words: &["пополнение", "зачисление"],
    summary_markers: &["итого:", "баланс:", "остаток:", "всего:"],
    categories: &[],
    date_patterns: &[
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
        "%d.%m.%Y",
        "%Y-%m-%dT%H:%M:%S",
    ],
};

pub struct OzonParser {
    date_patterns: Arc<Vec<String>>,
}

impl OzonParser {
    pub fn new() -> Self {
        OzonParser {
            date_patterns: patterns(LAYOUT.date_patterns),
        }
    }
}

impl Default for OzonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for OzonParser {
    fn id(&self) -> &'static str {
        "ozon"
    }

    fn label(&self) -> &str {
        "Ozon Bank"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        peek.find_header(is_header)
            .is_some_and(|header| header.mentions(MARKERS))
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("ozon") || name.contains("озон")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        statement_rows(source, &LAYOUT, self.date_patterns.clone())
    }
}
