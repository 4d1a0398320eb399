use std::collections::VecDeque;

use conduit_storage::BlobReader;
use serde_json::Value;

use super::{BoundedLines, Line, Record};
use crate::error::DecodeError;

/// Header row plus delimited rows. Quoted fields may span lines.
///
/// Column names are normalized (byte-order mark and quotes stripped,
/// trimmed, lower-cased) so exports from other tools map onto the same keys.
pub struct DelimitedDecoder {
    lines: BoundedLines,
    delimiter: u8,
    header: Option<Vec<String>>,
    /// Parsed rows not yet handed out.
    pending: VecDeque<Vec<String>>,
}

impl DelimitedDecoder {
    pub fn new(reader: BlobReader, delimiter: u8, max_record_bytes: usize) -> Self {
        Self {
            lines: BoundedLines::new(reader, max_record_bytes),
            delimiter,
            header: None,
            pending: VecDeque::new(),
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub async fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        loop {
            let fields = match self.pending.pop_front() {
                Some(fields) => fields,
                None => {
                    let Some(raw) = self.next_logical_row().await? else {
                        return Ok(None);
                    };
                    self.pending = parse_rows(&raw, self.delimiter)?;
                    continue;
                }
            };
            if fields.iter().all(|f| f.trim().is_empty()) {
                continue;
            }

            let Some(header) = &self.header else {
                self.header = Some(fields.iter().map(|h| normalize_column(h)).collect());
                continue;
            };

            let record: Record = header
                .iter()
                .zip(fields)
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, value)| (name.clone(), Value::String(value)))
                .collect();
            return Ok(Some(record));
        }
    }

    /// Join physical lines while a quoted field is still open.
    async fn next_logical_row(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let mut row: Vec<u8> = Vec::new();
        let mut quotes = QuoteState::default();
        loop {
            match self.lines.next_line().await? {
                None if row.is_empty() => return Ok(None),
                // unterminated quote at EOF: hand what we have to the parser
                None => return Ok(Some(row)),
                Some(Line::Oversized) => return Err(DecodeError::Oversized { limit: self.lines.max }),
                Some(Line::Complete(line)) => {
                    if !row.is_empty() {
                        row.push(b'\n');
                    }
                    if row.len() + line.len() > self.lines.max {
                        return Err(DecodeError::Oversized { limit: self.lines.max });
                    }
                    let open = quotes.feed(&line, self.delimiter);
                    row.extend_from_slice(&line);
                    if !open {
                        return Ok(Some(row));
                    }
                }
            }
        }
    }
}

/// Tracks whether a row is inside a quoted field across physical lines.
///
/// A quote opens a field only as its first byte; anywhere else in an
/// unquoted field it is a literal character, as the csv reader treats it.
#[derive(Default)]
struct QuoteState {
    in_quotes: bool,
}

impl QuoteState {
    /// Scan one line; true while a quoted field is still open at its end.
    fn feed(&mut self, line: &[u8], delimiter: u8) -> bool {
        let mut field_start = !self.in_quotes;
        let mut bytes = line.iter().copied().peekable();
        while let Some(b) = bytes.next() {
            if self.in_quotes {
                if b == b'"' {
                    // doubled quote is an escaped literal
                    if bytes.peek() == Some(&b'"') {
                        bytes.next();
                    } else {
                        self.in_quotes = false;
                    }
                }
                field_start = false;
            } else if b == delimiter {
                field_start = true;
            } else {
                if b == b'"' && field_start {
                    self.in_quotes = true;
                }
                field_start = false;
            }
        }
        self.in_quotes
    }
}

/// Every record in `bytes`, in order.
fn parse_rows(bytes: &[u8], delimiter: u8) -> Result<VecDeque<Vec<String>>, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);
    let mut rows = VecDeque::new();
    let mut record = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => rows.push_back(record.iter().map(str::to_string).collect()),
            Ok(false) => return Ok(rows),
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        }
    }
}

fn normalize_column(name: &str) -> String {
    name.replace(['\u{feff}', '"'], "").trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::reader_from;

    #[tokio::test]
    async fn header_is_normalized() {
        let mut d = DelimitedDecoder::new(
            reader_from("\u{feff}\"ID\", Email ,Name\nu1,a@x.com,alice\n".as_bytes()),
            b',',
            1024,
        );
        let rec = d.next_record().await.unwrap().unwrap();
        assert_eq!(rec["id"], "u1");
        assert_eq!(rec["email"], "a@x.com");
        assert_eq!(rec["name"], "alice");
        assert!(d.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quoted_field_spans_lines() {
        let mut d = DelimitedDecoder::new(
            reader_from(b"id,body\nc1,\"line one\nline \"\"two\"\"\"\nc2,plain\n"),
            b',',
            1024,
        );
        let first = d.next_record().await.unwrap().unwrap();
        assert_eq!(first["body"], "line one\nline \"two\"");
        let second = d.next_record().await.unwrap().unwrap();
        assert_eq!(second["id"], "c2");
    }

    #[tokio::test]
    async fn tabs_short_rows_and_blank_lines() {
        let mut d = DelimitedDecoder::new(reader_from(b"id\temail\n\nu1\n\nu2\tb@x.com\n"), b'\t', 1024);
        let short = d.next_record().await.unwrap().unwrap();
        assert_eq!(short["id"], "u1");
        assert!(!short.contains_key("email"));
        let full = d.next_record().await.unwrap().unwrap();
        assert_eq!(full["email"], "b@x.com");
        assert!(d.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stray_quote_inside_a_field_is_literal() {
        let mut d = DelimitedDecoder::new(
            reader_from(b"id,email,name\nu1,a\"b@x.com,alice\nu2,b@x.com,bob\nu3,c@x.com,carol\n"),
            b',',
            1024,
        );
        let mut ids = Vec::new();
        while let Some(rec) = d.next_record().await.unwrap() {
            ids.push(rec["id"].as_str().unwrap().to_string());
        }
        assert_eq!(ids, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn quote_state_spans_lines() {
        let mut q = QuoteState::default();
        assert!(q.feed(b"c1,\"open", b','));
        assert!(q.feed(b"still \"\"inside\"\"", b','));
        assert!(!q.feed(b"closed\",x", b','));

        let mut q = QuoteState::default();
        assert!(!q.feed(b"u1,a\"b,c", b','));
        assert!(!q.feed(b"\"x\"y,z\"", b','));
    }

    #[tokio::test]
    async fn oversized_row() {
        let mut d = DelimitedDecoder::new(reader_from(b"id,body\nc1,aaaaaaaaaaaaaaaaaaaaaaaa\nc2,b\n"), b',', 12);
        assert!(matches!(d.next_record().await, Err(DecodeError::Oversized { .. })));
        assert_eq!(d.next_record().await.unwrap().unwrap()["id"], "c2");
    }
}
