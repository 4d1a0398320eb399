//! Incremental record writers for each export format.

use conduit_core::Resource;

use super::ExportFormat;
use crate::error::ExportError;
use crate::store::ExportRow;

/// Encodes rows into an internal buffer the caller drains in chunks.
///
/// The JSON array writer manages its own brackets and separators so the
/// array can be emitted one element at a time.
pub struct RecordWriter {
    format: ExportFormat,
    resource: Resource,
    rows: u64,
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn new(format: ExportFormat, resource: Resource) -> Self {
        let mut buf = Vec::new();
        if format == ExportFormat::Json {
            buf.push(b'[');
        }
        Self {
            format,
            resource,
            rows: 0,
            buf,
        }
    }

    pub fn write_row(&mut self, row: &ExportRow) -> Result<(), ExportError> {
        match self.format {
            ExportFormat::Ndjson => {
                serde_json::to_writer(&mut self.buf, row)?;
                self.buf.push(b'\n');
            }
            ExportFormat::Json => {
                let sep: &[u8] = if self.rows == 0 { b"\n" } else { b",\n" };
                self.buf.extend_from_slice(sep);
                serde_json::to_writer(&mut self.buf, row)?;
            }
            ExportFormat::Csv => {
                let mut csv = csv::WriterBuilder::new().from_writer(&mut self.buf);
                if self.rows == 0 {
                    csv.write_record(ExportRow::columns(self.resource))?;
                }
                csv.write_record(row.cells())?;
                csv.flush()?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drain everything encoded so far.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Close the document and drain the remainder.
    pub fn finish(mut self) -> Vec<u8> {
        if self.format == ExportFormat::Json {
            let close: &[u8] = if self.rows == 0 { b"]\n" } else { b"\n]\n" };
            self.buf.extend_from_slice(close);
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UserRow;

    fn user(id: &str, name: &str) -> ExportRow {
        ExportRow::User(UserRow {
            id: Some(id.into()),
            username: name.into(),
            email: format!("{name}@x.com"),
            bio: None,
            image: None,
        })
    }

    fn render(format: ExportFormat, rows: &[ExportRow]) -> String {
        let mut w = RecordWriter::new(format, Resource::Users);
        let mut out = Vec::new();
        for row in rows {
            w.write_row(row).unwrap();
            out.extend(w.take());
        }
        out.extend(w.finish());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn csv_header_once() {
        let out = render(ExportFormat::Csv, &[user("u1", "alice"), user("u2", "bob")]);
        assert_eq!(
            out,
            "id,username,email,bio,image\nu1,alice,alice@x.com,,\nu2,bob,bob@x.com,,\n"
        );
        assert_eq!(render(ExportFormat::Csv, &[]), "");
    }

    #[test]
    fn csv_quotes_when_needed() {
        let out = render(ExportFormat::Csv, &[user("u1", "a,b")]);
        assert!(out.ends_with("u1,\"a,b\",\"a,b@x.com\",,\n"));
    }

    #[test]
    fn json_array_is_valid_when_streamed() {
        let out = render(ExportFormat::Json, &[user("u1", "alice"), user("u2", "bob")]);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[1]["username"], "bob");

        assert_eq!(render(ExportFormat::Json, &[]), "[]\n");
    }

    #[test]
    fn ndjson_one_line_per_row() {
        let out = render(ExportFormat::Ndjson, &[user("u1", "alice"), user("u2", "bob")]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("{\"id\":\"u1\""));
        assert_eq!(render(ExportFormat::Ndjson, &[]), "");
    }
}
