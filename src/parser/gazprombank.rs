// Gazprombank statement export
// Bank preamble, ';' or tab table, two- or four-digit years; footer lines end in ':'

use std::io::Read;
use std::sync::Arc;

use super::statement::{statement_rows, StatementLayout};
use super::{patterns, FormatParser, Rows};
use crate::detector::Peek;

const MARKERS: &[&str] = &["газпромбанк", "gazprombank", "гпб", "gpb"];

fn is_header(fields: &[String]) -> bool {
    let has = |word: &str| fields.iter().any(|f| f.contains(word));
    has("дата операции") || (has("дата") && has("сумма") && (has("описание") || has("операция")))
}

static LAYOUT: StatementLayout = StatementLayout {
    is_header,
    date: &["дата операции", "дата"],
    amount: &["сумма операции", "сумма в валюте счета", "сумма"],
    description: &["описание", "назначение платежа", "назначение", "операция"],
    category: &["категория"],
    currency: &["валюта операции", "валюта"],
    kind: &["тип операции", "тип"],
    expense_words: &["списание", "расход"],
    income_words: &["зачисление", "поступление"],
    summary_markers: &[
        "итого:",
        "баланс:",
        "остаток:",
        "всего:",
        "комиссия:",
        "по счету",
    ],
    categories: &[],
    // %y first: %Y would read "24" as the year 24
    date_patterns: &[
        "%d.%m.%y",
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
        "%d.%m.%Y",
        "%Y-%m-%d",
    ],
};

pub struct GazprombankParser {
    date_patterns: Arc<Vec<String>>,
}

impl GazprombankParser {
    pub fn new() -> Self {
        GazprombankParser {
            date_patterns: patterns(LAYOUT.date_patterns),
        }
    }
}

impl Default for GazprombankParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for GazprombankParser {
    fn id(&self) -> &'static str {
        "gazprombank"
    }

    fn label(&self) -> &str {
        "Gazprombank"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        peek.find_header(is_header)
            .is_some_and(|header| header.mentions(MARKERS))
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("gazprom") || name.contains("газпром") || name.contains("gpb")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        statement_rows(source, &LAYOUT, self.date_patterns.clone())
    }
}
