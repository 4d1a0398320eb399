//! Format detection and streaming record decoders.
//!
//! Every decoder yields one [`Record`] at a time from a buffered byte stream,
//! so an import never holds more than one record (bounded by
//! `max_record_bytes`) in memory regardless of source size.

mod delimited;
mod json_array;
mod ndjson;

use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt};

use conduit_storage::BlobReader;

use crate::error::{DecodeError, IngestError};

pub use delimited::DelimitedDecoder;
pub use json_array::JsonArrayDecoder;
pub use ndjson::NdjsonDecoder;

/// One decoded source record: field name to value.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// One JSON object per line.
    Ndjson,
    /// A single JSON array enclosing all records.
    JsonArray,
    /// Header row plus delimited rows.
    Delimited { delimiter: u8 },
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Ndjson => f.write_str("ndjson"),
            SourceFormat::JsonArray => f.write_str("json_array"),
            SourceFormat::Delimited { delimiter: b'\t' } => f.write_str("tsv"),
            SourceFormat::Delimited { .. } => f.write_str("csv"),
        }
    }
}

/// Delimited-text has no distinguishing leading byte, so it is chosen from
/// the source key's extension (`.csv`, `.tsv`). Query strings are ignored.
pub fn format_from_key(source_key: &str) -> Option<SourceFormat> {
    let path = source_key.split(['?', '#']).next().unwrap_or(source_key);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
    match ext.as_str() {
        "csv" => Some(SourceFormat::Delimited { delimiter: b',' }),
        "tsv" => Some(SourceFormat::Delimited { delimiter: b'\t' }),
        _ => None,
    }
}

/// Classify a stream by its first non-whitespace byte.
///
/// The returned reader replays every byte consumed while peeking, so callers
/// read from position zero.
pub async fn detect(mut reader: BlobReader) -> Result<(SourceFormat, BlobReader), IngestError> {
    let mut prefix = Vec::new();
    let first = loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(IngestError::EmptySource);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => break buf[i],
            None => {
                let n = buf.len();
                prefix.extend_from_slice(buf);
                reader.consume(n);
            }
        }
    };

    let format = match first {
        b'[' => SourceFormat::JsonArray,
        b'{' => SourceFormat::Ndjson,
        other => return Err(IngestError::UnknownFormat(other as char)),
    };

    let replay: BlobReader = if prefix.is_empty() {
        reader
    } else {
        Box::new(Cursor::new(prefix).chain(reader))
    };
    Ok((format, replay))
}

/// Uniform pull interface over the three source formats.
pub enum RecordDecoder {
    Ndjson(NdjsonDecoder),
    JsonArray(JsonArrayDecoder),
    Delimited(DelimitedDecoder),
}

impl RecordDecoder {
    /// Pick a format (key extension first, then sniffing) and wrap the reader.
    pub async fn open(
        reader: BlobReader,
        source_key: &str,
        max_record_bytes: usize,
    ) -> Result<Self, IngestError> {
        let (format, reader) = match format_from_key(source_key) {
            Some(format) => (format, reader),
            None => detect(reader).await?,
        };
        Ok(Self::new(format, reader, max_record_bytes))
    }

    pub fn new(format: SourceFormat, reader: BlobReader, max_record_bytes: usize) -> Self {
        match format {
            SourceFormat::Ndjson => RecordDecoder::Ndjson(NdjsonDecoder::new(reader, max_record_bytes)),
            SourceFormat::JsonArray => {
                RecordDecoder::JsonArray(JsonArrayDecoder::new(reader, max_record_bytes))
            }
            SourceFormat::Delimited { delimiter } => {
                RecordDecoder::Delimited(DelimitedDecoder::new(reader, delimiter, max_record_bytes))
            }
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self {
            RecordDecoder::Ndjson(_) => SourceFormat::Ndjson,
            RecordDecoder::JsonArray(_) => SourceFormat::JsonArray,
            RecordDecoder::Delimited(d) => SourceFormat::Delimited { delimiter: d.delimiter() },
        }
    }

    /// Next record, or `Ok(None)` at end of stream.
    pub async fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        match self {
            RecordDecoder::Ndjson(d) => d.next_record().await,
            RecordDecoder::JsonArray(d) => d.next_record().await,
            RecordDecoder::Delimited(d) => d.next_record().await,
        }
    }
}

/// Result of reading one physical line.
enum Line {
    Complete(Vec<u8>),
    /// The line was longer than the limit; its bytes were discarded.
    Oversized,
}

/// Newline splitter with a per-line byte ceiling.
struct BoundedLines {
    reader: BlobReader,
    max: usize,
}

impl BoundedLines {
    fn new(reader: BlobReader, max: usize) -> Self {
        Self { reader, max }
    }

    /// Next line without its terminator, `None` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<Line>> {
        let mut line = Vec::new();
        let mut oversized = false;
        let mut read_any = false;

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                break;
            }
            read_any = true;

            let (chunk_len, used, done) = match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i, i + 1, true),
                None => (buf.len(), buf.len(), false),
            };
            if !oversized {
                if line.len() + chunk_len > self.max {
                    oversized = true;
                    line = Vec::new();
                } else {
                    line.extend_from_slice(&buf[..chunk_len]);
                }
            }
            self.reader.consume(used);
            if done {
                break;
            }
        }

        if !read_any {
            return Ok(None);
        }
        if oversized {
            return Ok(Some(Line::Oversized));
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(Line::Complete(line)))
    }
}

/// Parse one JSON document that must be an object.
fn parse_object(bytes: &[u8]) -> Result<Record, DecodeError> {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(DecodeError::Malformed(format!(
            "expected an object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
pub(crate) fn reader_from(bytes: &'static [u8]) -> BlobReader {
    Box::new(bytes)
}
