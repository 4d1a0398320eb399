use tokio::io::AsyncBufReadExt;

use conduit_storage::BlobReader;

use super::{parse_object, Record};
use crate::error::DecodeError;

/// Structural state while scanning one array element.
#[derive(Default)]
struct Scan {
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    fn at_top(&self) -> bool {
        self.depth == 0 && !self.in_string
    }

    /// Feed one byte. Returns true when a container closes back to depth 0.
    fn step(&mut self, b: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            return false;
        }
        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' if self.depth > 0 => {
                self.depth -= 1;
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}

/// Streams the elements of one top-level JSON array, one element per call.
///
/// Only the current element is buffered. A malformed element is reported and
/// skipped; scanning resumes at the next top-level separator.
pub struct JsonArrayDecoder {
    reader: BlobReader,
    max: usize,
    opened: bool,
    done: bool,
}

impl JsonArrayDecoder {
    pub fn new(reader: BlobReader, max_record_bytes: usize) -> Self {
        Self {
            reader,
            max: max_record_bytes,
            opened: false,
            done: false,
        }
    }

    /// Skip whitespace and return the next byte without consuming it.
    async fn peek_token(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(i) => {
                    let b = buf[i];
                    self.reader.consume(i);
                    return Ok(Some(b));
                }
                None => {
                    let n = buf.len();
                    self.reader.consume(n);
                }
            }
        }
    }

    pub async fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        if self.done {
            return Ok(None);
        }

        if !self.opened {
            match self.peek_token().await? {
                Some(b'[') => {
                    self.reader.consume(1);
                    self.opened = true;
                }
                Some(other) => {
                    self.done = true;
                    return Err(DecodeError::Malformed(format!(
                        "expected '[' to open the array, found {:?}",
                        other as char
                    )));
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }

        loop {
            match self.peek_token().await? {
                None => {
                    self.done = true;
                    return Ok(None);
                }
                Some(b',') => self.reader.consume(1),
                Some(b']') => {
                    self.reader.consume(1);
                    self.done = true;
                    return Ok(None);
                }
                Some(_) => break,
            }
        }

        let mut element = Vec::new();
        let mut oversized = false;
        let mut scan = Scan::default();
        let mut complete = false;

        while !complete {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                self.done = true;
                break;
            }

            let mut used = 0;
            while used < buf.len() {
                let b = buf[used];
                if scan.at_top() && (b == b',' || b == b']') {
                    complete = true;
                    break;
                }
                used += 1;
                if scan.step(b) {
                    complete = true;
                    break;
                }
            }

            if !oversized {
                if element.len() + used > self.max {
                    oversized = true;
                    element = Vec::new();
                } else {
                    element.extend_from_slice(&buf[..used]);
                }
            }
            self.reader.consume(used);
        }

        if oversized {
            return Err(DecodeError::Oversized { limit: self.max });
        }
        if !complete {
            return Err(DecodeError::Malformed("array ended mid-element".into()));
        }
        parse_object(&element).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::reader_from;

    async fn drain(d: &mut JsonArrayDecoder) -> Vec<Result<Record, String>> {
        let mut out = Vec::new();
        loop {
            match d.next_record().await {
                Ok(Some(r)) => out.push(Ok(r)),
                Ok(None) => break,
                Err(e) => out.push(Err(e.to_string())),
            }
        }
        out
    }

    #[tokio::test]
    async fn yields_elements_in_order() {
        let mut d = JsonArrayDecoder::new(
            reader_from(b" [ {\"id\":\"u1\",\"tags\":[\"a\",\"b\"]} ,\n {\"id\":\"u2\",\"nested\":{\"x\":[1]}} ] "),
            1024,
        );
        let out = drain(&mut d).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap()["id"], "u1");
        assert_eq!(out[1].as_ref().unwrap()["nested"]["x"][0], 1);
    }

    #[tokio::test]
    async fn structural_bytes_inside_strings_are_ignored() {
        let mut d = JsonArrayDecoder::new(
            reader_from(br#"[{"body":"a ] b , c } \" {"},{"body":"ok"}]"#),
            1024,
        );
        let out = drain(&mut d).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap()["body"], "a ] b , c } \" {");
        assert_eq!(out[1].as_ref().unwrap()["body"], "ok");
    }

    #[tokio::test]
    async fn empty_array_ends_immediately() {
        let mut d = JsonArrayDecoder::new(reader_from(b"[ ]"), 1024);
        assert!(d.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_elements_are_skipped() {
        let mut d = JsonArrayDecoder::new(
            reader_from(br#"[{"a":1}, 42, {"a":tru}, "str", {"a":2}]"#),
            1024,
        );
        let out = drain(&mut d).await;
        assert_eq!(out.len(), 5);
        assert!(out[1].is_err());
        assert!(out[2].is_err());
        assert!(out[3].is_err());
        assert_eq!(out[4].as_ref().unwrap()["a"], 2);
    }

    #[tokio::test]
    async fn oversized_element_then_continue() {
        let mut d = JsonArrayDecoder::new(
            reader_from(br#"[{"a":"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"},{"a":1}]"#),
            16,
        );
        assert!(matches!(
            d.next_record().await,
            Err(DecodeError::Oversized { limit: 16 })
        ));
        assert_eq!(d.next_record().await.unwrap().unwrap()["a"], 1);
        assert!(d.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_array() {
        let mut d = JsonArrayDecoder::new(reader_from(br#"[{"a":1},{"a":"#), 1024);
        assert_eq!(d.next_record().await.unwrap().unwrap()["a"], 1);
        assert!(matches!(d.next_record().await, Err(DecodeError::Malformed(_))));
        assert!(d.next_record().await.unwrap().is_none());
    }
}
