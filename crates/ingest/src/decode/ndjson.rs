use conduit_storage::BlobReader;

use super::{parse_object, BoundedLines, Line, Record};
use crate::error::DecodeError;

/// One JSON object per line. Blank lines are skipped.
pub struct NdjsonDecoder {
    lines: BoundedLines,
}

impl NdjsonDecoder {
    pub fn new(reader: BlobReader, max_record_bytes: usize) -> Self {
        Self {
            lines: BoundedLines::new(reader, max_record_bytes),
        }
    }

    pub async fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(Line::Oversized) => {
                    return Err(DecodeError::Oversized { limit: self.lines.max })
                }
                Some(Line::Complete(line)) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return parse_object(&line).map(Some);
                }
            }
        }
    }
}
