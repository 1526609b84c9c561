// VTB account statement export
// Bank preamble, then a ';' or tab table with an operation type column; dates
// with or without time, ISO dates in newer exports

use std::io::Read;
use std::sync::Arc;

use super::statement::{statement_rows, StatementLayout};
use super::{patterns, FormatParser, Rows};
use crate::detector::Peek;

const MARKERS: &[&str] = &["втб", "vtb"];

fn is_header(fields: &[String]) -> bool {
    let has = |word: &str| fields.iter().any(|f| f.contains(word));
    has("дата операции") || (has("дата") && has("сумма") && (has("описание") || has("назначение")))
}

static LAYOUT: StatementLayout = StatementLayout {
    is_header,
    date: &["дата операции", "дата и время операции", "дата"],
    amount: &[
        "сумма операции",
        "сумма в валюте счета",
        "сумма в валюте счёта",
        "сумма",
    ],
    description: &[
        "описание операции",
        "описание",
        "назначение платежа",
        "назначение",
        "детали",
        "примечание",
        "информация",
    ],
    category: &["категория"],
    currency: &["валюта операции", "валюта"],
    kind: &["тип операции", "тип"],
    expense_words: &["списание", "расход"],
    income_words: &["зачисление", "поступление", "приход"],
    summary_markers: &[
        "итого",
        "остаток",
        "входящий",
        "исходящий",
        "баланс",
        "выписка сформирована",
    ],
    categories: &[],
    date_patterns: &["%d.%m.%Y %H:%M:%S", "%d.%m.%Y %H:%M", "%d.%m.%Y", "%Y-%m-%d"],
};

pub struct VtbParser {
    date_patterns: Arc<Vec<String>>,
}

impl VtbParser {
    pub fn new() -> Self {
        VtbParser {
            date_patterns: patterns(LAYOUT.date_patterns),
        }
    }
}

impl Default for VtbParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for VtbParser {
    fn id(&self) -> &'static str {
        "vtb"
    }

    fn label(&self) -> &str {
        "VTB"
    }

    fn sniff_header(&self, peek: &Peek) -> bool {
        peek.find_header(is_header)
            .is_some_and(|header| header.mentions(MARKERS))
    }

    fn matches_file_name(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        name.contains("vtb") || name.contains("втб")
    }

    fn parse<'a>(&self, source: Box<dyn Read + 'a>) -> Rows<'a> {
        statement_rows(source, &LAYOUT, self.date_patterns.clone())
    }
}
