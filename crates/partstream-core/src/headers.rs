//! Semicolon-delimited header parameter parsing.
//!
//! Handles the `Content-Disposition` and `Content-Type` shapes seen in
//! multipart bodies: `form-data; name="field"; filename="file.txt"`. Keys
//! are case-sensitive; bare keys (no `=`) carry no value but their presence
//! is meaningful (`form-data`, `attachment`).

use std::collections::HashMap;

/// Parse a semicolon-delimited `key[=value]` header value.
///
/// Values are trimmed and unquoted. `None` input yields an empty map.
pub(crate) fn parse_params(value: Option<&str>) -> HashMap<String, Option<String>> {
    let mut params = HashMap::new();
    let Some(value) = value else {
        return params;
    };

    for segment in value.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match segment.split_once('=') {
            Some((key, raw_value)) => {
                params.insert(key.trim().to_string(), Some(unquote(raw_value)));
            }
            None => {
                params.insert(segment.to_string(), None);
            }
        }
    }
    params
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
