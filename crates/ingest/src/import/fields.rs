//! Field extraction from decoded records.
//!
//! Records arrive from JSON (typed values) or delimited text (strings only),
//! so every accessor accepts either representation.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::decode::Record;

/// First non-empty value among `keys`, trimmed. Numbers are rendered as text.
pub fn text(record: &Record, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Untrimmed string value, for free text such as bodies.
pub fn raw(record: &Record, key: &str) -> Option<String> {
    record.get(key)?.as_str().map(str::to_string)
}

/// Tag-style list. JSON arrays are taken as-is; text is split on `,`, `;`
/// or `|`. Empty entries are dropped.
pub fn list(record: &Record, key: &str) -> Vec<String> {
    let items: Vec<String> = match record.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .collect(),
        Some(Value::String(s)) => s.split([',', ';', '|']).map(|t| t.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    items.into_iter().filter(|t| !t.is_empty()).collect()
}

/// RFC 3339 timestamp; unparseable values are treated as absent.
pub fn timestamp(record: &Record, key: &str) -> Option<DateTime<Utc>> {
    let raw = text(record, &[key])?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn text_falls_back_across_aliases() {
        let r = rec(json!({"id": "", "uuid": " u1 ", "n": 7}));
        assert_eq!(text(&r, &["id", "uuid"]).as_deref(), Some("u1"));
        assert_eq!(text(&r, &["n"]).as_deref(), Some("7"));
        assert_eq!(text(&r, &["missing"]), None);
    }

    #[test]
    fn raw_keeps_whitespace() {
        let r = rec(json!({"body": "  indented\n", "n": 1}));
        assert_eq!(raw(&r, "body").as_deref(), Some("  indented\n"));
        assert_eq!(raw(&r, "n"), None);
    }

    #[test]
    fn lists_from_arrays_and_text() {
        let r = rec(json!({"tagList": ["rust", " ", "go"], "tags": "a, b;c|"}));
        assert_eq!(list(&r, "tagList"), vec!["rust", "go"]);
        assert_eq!(list(&r, "tags"), vec!["a", "b", "c"]);
        assert!(list(&r, "nope").is_empty());
    }

    #[test]
    fn timestamps() {
        let r = rec(json!({"created_at": "2024-01-02T03:04:05+02:00", "bad": "yesterday"}));
        let t = timestamp(&r, "created_at").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-02T01:04:05+00:00");
        assert!(timestamp(&r, "bad").is_none());
    }
}
