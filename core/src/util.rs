//! URL escaping and query-string helpers.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

/// Everything outside the RFC 3986 unreserved set.
const RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode every byte except unreserved characters.
pub fn escape(value: &str) -> String {
    utf8_percent_encode(value, RESERVED).to_string()
}

/// Reverse `escape`. Malformed escapes are kept literally; byte sequences
/// that are not UTF-8 are replaced lossily.
pub fn unescape(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Flatten a JSON object into `key=value` pairs; nested objects become
/// `outer[inner]=value`. Non-object input yields no pairs.
pub fn build_query_pairs(value: &Value, escape_values: bool) -> Vec<String> {
    fn walk(
        map: &serde_json::Map<String, Value>,
        prefix: &str,
        escape_values: bool,
        pairs: &mut Vec<String>,
    ) {
        for (key, value) in map {
            let key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}[{key}]")
            };
            match value {
                Value::Object(inner) => walk(inner, &key, escape_values, pairs),
                leaf => {
                    let text = scalar_text(leaf);
                    let text = if escape_values { escape(&text) } else { text };
                    pairs.push(format!("{key}={text}"));
                }
            }
        }
    }

    let mut pairs = Vec::new();
    if let Value::Object(map) = value {
        walk(map, "", escape_values, &mut pairs);
    }
    pairs
}

pub fn build_query_string(value: &Value, escape_values: bool) -> String {
    build_query_pairs(value, escape_values).join("&")
}

/// `application/x-www-form-urlencoded` body for the given fields.
pub fn url_encoded_form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}
