// Format Detection
// Peek a bounded prefix, pick one registered parser, hand it the untouched stream

use csv::ReaderBuilder;
use std::fmt;
use std::io::{Cursor, Read};

use crate::error::ImportError;
use crate::parser::{FormatParser, ParserRegistry};

pub(crate) const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Non-blank lines a statement may carry before (and including) its table header
pub const HEADER_SEARCH_LINES: usize = 20;

// ============================================================================
// PEEK BUFFER
// ============================================================================

/// The bytes sniffers are allowed to look at
#[derive(Debug, Clone)]
pub struct Peek {
    text: String,
    file_name: Option<String>,
    /// The source continues past the buffer, so the last line may be cut
    truncated: bool,
}

impl Peek {
    pub fn from_bytes(bytes: &[u8], file_name: Option<&str>) -> Self {
        Self::build(bytes, file_name, false)
    }

    fn build(bytes: &[u8], file_name: Option<&str>, truncated: bool) -> Self {
        let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
        Peek {
            text: String::from_utf8_lossy(bytes).into_owned(),
            file_name: file_name.map(|n| n.to_string()),
            truncated,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// First non-blank line
    pub fn header(&self) -> Option<&str> {
        self.text.lines().map(|l| l.trim()).find(|l| !l.is_empty())
    }

    /// Header split on `delimiter` (quotes honoured), lower-cased and trimmed
    pub fn header_fields(&self, delimiter: char) -> Vec<String> {
        match (self.header(), u8::try_from(delimiter)) {
            (Some(header), Ok(delimiter)) => split_fields(header, delimiter),
            _ => Vec::new(),
        }
    }

    /// Table header below a bank preamble: the first of the leading
    /// `HEADER_SEARCH_LINES` non-blank lines whose fields satisfy `is_header`
    pub fn find_header(&self, is_header: impl Fn(&[String]) -> bool) -> Option<HeaderLine> {
        let mut preamble = Vec::new();
        for line in self
            .text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .take(HEADER_SEARCH_LINES)
        {
            let header = HeaderLine::parse(line, &preamble);
            if is_header(&header.fields) {
                return Some(header);
            }
            preamble.push(line.to_lowercase());
        }
        None
    }

    /// Every complete record in the buffer has the same column count, at least `min`
    pub fn consistent_columns(&self, delimiter: char, min: usize) -> bool {
        let Ok(delimiter) = u8::try_from(delimiter) else {
            return false;
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(self.text.as_bytes());

        let mut widths: Vec<usize> = Vec::new();
        for record in reader.records() {
            match record {
                Ok(record) if record.iter().all(|f| f.trim().is_empty()) => continue,
                Ok(record) => widths.push(record.len()),
                Err(_) if self.truncated => break,
                Err(_) => return false,
            }
        }
        if self.truncated && widths.len() > 1 {
            widths.pop();
        }

        match widths.first() {
            Some(&first) => first >= min && widths.iter().all(|&w| w == first),
            None => false,
        }
    }
}

/// A header row located by [`Peek::find_header`] or a statement parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    /// Lower-cased, trimmed column names
    pub fields: Vec<String>,
    pub delimiter: u8,
    /// Lower-cased non-blank lines above the header
    pub preamble: Vec<String>,
}

impl HeaderLine {
    pub fn parse(line: &str, preamble: &[String]) -> Self {
        let delimiter = guess_delimiter(line);
        HeaderLine {
            fields: split_fields(line, delimiter),
            delimiter,
            preamble: preamble.to_vec(),
        }
    }

    /// Some preamble line contains one of `markers` (lower-case)
    pub fn mentions(&self, markers: &[&str]) -> bool {
        self.preamble
            .iter()
            .any(|line| markers.iter().any(|m| line.contains(m)))
    }
}

/// `;` when present, then tab, else `,`
pub fn guess_delimiter(line: &str) -> u8 {
    if line.contains(';') {
        b';'
    } else if line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

pub(crate) fn split_fields(line: &str, delimiter: u8) -> Vec<String> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => record
            .iter()
            .map(|f| f.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

/// Which sniffer selected the parser, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SniffTier {
    Header,
    Delimiter,
}

impl fmt::Display for SniffTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SniffTier::Header => f.write_str("header"),
            SniffTier::Delimiter => f.write_str("delimiter"),
        }
    }
}

/// Chosen parser plus the re-assembled source, positioned at byte 0
pub struct Detection<'r> {
    pub parser: &'r dyn FormatParser,
    pub tier: SniffTier,
    pub reader: Box<dyn Read + Send>,
}

pub struct FormatDetector<'r> {
    registry: &'r ParserRegistry,
    peek_bytes: usize,
}

impl<'r> FormatDetector<'r> {
    pub fn new(registry: &'r ParserRegistry, peek_bytes: usize) -> Self {
        FormatDetector {
            registry,
            peek_bytes,
        }
    }

    /// Pure selection over an already-read prefix
    pub fn sniff(&self, peek: &Peek) -> Option<(&'r dyn FormatParser, SniffTier)> {
        let tiers: [(SniffTier, fn(&dyn FormatParser, &Peek) -> bool); 2] = [
            (SniffTier::Header, |p, peek| p.sniff_header(peek)),
            (SniffTier::Delimiter, |p, peek| p.sniff_delimiter(peek)),
        ];

        for (tier, sniffer) in tiers {
            let candidates: Vec<&'r dyn FormatParser> = self
                .registry
                .iter()
                .filter(|parser| sniffer(*parser, peek))
                .collect();

            if candidates.is_empty() {
                continue;
            }

            // Filename only breaks ties, then registration order
            let chosen = peek
                .file_name()
                .and_then(|name| candidates.iter().find(|p| p.matches_file_name(name)))
                .copied()
                .unwrap_or(candidates[0]);

            return Some((chosen, tier));
        }
        None
    }

    /// Read up to `peek_bytes`, select a parser and rewrap the prefix in front
    /// of the unread remainder
    pub fn detect(
        &self,
        mut reader: Box<dyn Read + Send>,
        file_name: Option<&str>,
    ) -> Result<Detection<'r>, ImportError> {
        let mut buf = Vec::with_capacity(self.peek_bytes);
        reader
            .by_ref()
            .take(self.peek_bytes as u64)
            .read_to_end(&mut buf)
            .map_err(|e| ImportError::SourceIo(format!("failed to read source: {}", e)))?;

        let truncated = buf.len() >= self.peek_bytes;
        let peek = Peek::build(&buf, file_name, truncated);

        let (parser, tier) = self.sniff(&peek).ok_or_else(|| {
            let header = peek.header().unwrap_or("<empty>");
            let header: String = header.chars().take(80).collect();
            ImportError::UnsupportedFormat(format!(
                "{} (first line: {})",
                file_name.unwrap_or("<stream>"),
                header
            ))
        })?;

        tracing::debug!(
            format = parser.id(),
            %tier,
            peeked = buf.len(),
            "format detected"
        );

        Ok(Detection {
            parser,
            tier,
            reader: Box::new(Cursor::new(buf).chain(reader)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;

    fn registry() -> ParserRegistry {
        ParserRegistry::standard(&ImportConfig::default())
    }

    fn detect_id(bytes: &[u8], file_name: Option<&str>) -> Option<&'static str> {
        let registry = registry();
        let detector = FormatDetector::new(&registry, 8192);
        detector
            .sniff(&Peek::from_bytes(bytes, file_name))
            .map(|(parser, _)| parser.id())
    }

    #[test]
    fn test_header_tier_beats_filename() {
        let bofa = b"Date,Description,Amount\n12/31/2024,Coffee,-4.50\n";
        assert_eq!(detect_id(bofa, Some("apple_export.csv")), Some("bofa"));
        assert_eq!(detect_id(bofa, None), Some("bofa"));
    }

    #[test]
    fn test_each_shipped_header() {
        assert_eq!(
            detect_id(b"TransferWise ID,Date,Amount,Currency\n", None),
            Some("wise")
        );
        assert_eq!(
            detect_id(
                "Дата операции;Номер карты;Статус;Сумма операции\n".as_bytes(),
                None
            ),
            Some("tinkoff")
        );
        assert_eq!(
            detect_id(br#"{"object":"list","data":[{"id":"txn_1"}]}"#, None),
            Some("stripe")
        );
        assert_eq!(
            detect_id(
                b"Transaction Date,Clearing Date,Description,Merchant,Category,Type,Amount (USD)\n",
                None
            ),
            Some("apple_card")
        );
    }

    #[test]
    fn test_delimiter_tier_falls_back_to_generic() {
        let csv = b"when,what,how much,ccy\n2024-01-01,Tea,-2.00,EUR\n";
        assert_eq!(detect_id(csv, None), Some("generic_csv"));
    }

    #[test]
    fn test_no_match_is_unsupported() {
        let registry = registry();
        let detector = FormatDetector::new(&registry, 8192);
        let source: Box<dyn Read + Send> =
            Box::new(Cursor::new(b"%PDF-1.7 binary statement\n".to_vec()));

        match detector.detect(source, Some("statement.pdf")) {
            Err(err) => assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedFormat),
            Ok(_) => panic!("expected UnsupportedFormat"),
        }
    }

    #[test]
    fn test_detect_rewraps_full_content() {
        let registry = registry();
        let detector = FormatDetector::new(&registry, 64);
        let mut content = String::from("Date,Description,Amount\n");
        for day in 1..=20 {
            content.push_str(&format!("01/{:02}/2025,Coffee shop number {},-4.50\n", day, day));
        }
        let source: Box<dyn Read + Send> = Box::new(Cursor::new(content.clone().into_bytes()));

        let detection = detector.detect(source, None).unwrap();
        assert_eq!(detection.parser.id(), "bofa");
        assert_eq!(detection.tier, SniffTier::Header);

        let mut seen = String::new();
        let mut reader = detection.reader;
        reader.read_to_string(&mut seen).unwrap();
        assert_eq!(seen, content);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let bytes = b"a;b;c\n1;2;3\n";
        let first = detect_id(bytes, Some("x.csv"));
        for _ in 0..5 {
            assert_eq!(detect_id(bytes, Some("x.csv")), first);
        }
    }

    #[test]
    fn test_header_found_below_bank_preamble() {
        let cases: [(&str, &str); 4] = [
            (
                "ПАО Сбербанк\nВыписка по карте\n\nДата операции;Дата проводки;Сумма в валюте счёта;Категория;Описание\n31.12.2024;31.12.2024;-10,00;Транспорт;Метро\n",
                "sberbank",
            ),
            (
                "Банк ВТБ (ПАО)\nДата операции\tСумма операции\tОписание операции\n15.12.2024\t-1,00\tМТС\n",
                "vtb",
            ),
            (
                "Газпромбанк (АО)\nДата;Операция;Сумма;Описание\n05.12.24;Списание;1,00;ЖКХ\n",
                "gazprombank",
            ),
            (
                "Ozon Банк\nДата операции;Описание;Сумма\n19.12.2024;Покупка;1,00\n",
                "ozon",
            ),
        ];
        for (text, expected) in cases {
            assert_eq!(detect_id(text.as_bytes(), None), Some(expected), "{}", text);
            // Filename hints do not override a header match
            assert_eq!(detect_id(text.as_bytes(), Some("tinkoff.csv")), Some(expected));
        }
    }

    #[test]
    fn test_find_header_is_bounded() {
        let mut text = String::new();
        for i in 0..HEADER_SEARCH_LINES - 1 {
            text.push_str(&format!("preamble {}\n", i));
        }
        let is_header = |fields: &[String]| fields.iter().any(|f| f == "amount");

        let within = format!("{}date;amount\n", text);
        let header = Peek::from_bytes(within.as_bytes(), None)
            .find_header(is_header)
            .unwrap();
        assert_eq!(header.delimiter, b';');
        assert_eq!(header.fields, vec!["date", "amount"]);
        assert_eq!(header.preamble.len(), HEADER_SEARCH_LINES - 1);
        assert!(header.mentions(&["preamble 3"]));

        let beyond = format!("{}one more\ndate;amount\n", text);
        assert!(Peek::from_bytes(beyond.as_bytes(), None)
            .find_header(is_header)
            .is_none());
    }

    #[test]
    fn test_guess_delimiter() {
        assert_eq!(guess_delimiter("a;b\tc"), b';');
        assert_eq!(guess_delimiter("a\tb,c"), b'\t');
        assert_eq!(guess_delimiter("a,b"), b',');
    }

    #[test]
    fn test_peek_strips_bom_and_tolerates_cut_line() {
        let peek = Peek::build(b"\xEF\xBB\xBFa,b,c\n1,2,3\n4,5", None, true);
        assert_eq!(peek.header(), Some("a,b,c"));
        assert!(peek.consistent_columns(',', 3));
    }
}
