use std::fmt::{Display, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Hex encoded SHA-1 of the canonical JSON form of a fetch's identity.
#[derive(Clone, Hash, Deserialize, Serialize, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(s: String) -> Self {
        CacheKey(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Object keys are sorted, separators are `,` and `:` without whitespace and every
    /// character outside printable ASCII is written as a `\uXXXX` escape, so the digest
    /// does not depend on insertion order, platform or serializer defaults.
    pub fn from_value(value: &Value) -> CacheKey {
        let mut canonical = String::new();
        write_canonical(value, &mut canonical);
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn compute_key<T: Serialize + ?Sized>(data: &T) -> Result<CacheKey, serde_json::Error> {
    Ok(CacheKey::from_value(&serde_json::to_value(data)?))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_ascii_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_ascii_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_ascii_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    // Writing to a String cannot fail.
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}
