//! Best-effort primary-key extraction from oversized or truncated payloads.
//!
//! Used only for diagnostics when a line exceeds the logging threshold; the
//! fragment may be cut mid-document, so a lenient JSON parse is attempted
//! first and a per-key regex scan is the fallback. Not correctness-bearing.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

/// Placeholder reported for a key that could not be found in the fragment.
pub const MISSING: &str = "[missing]";

/// Pull the stream name out of a (possibly truncated) record line.
pub fn extract_stream_name(fragment: &str) -> Option<String> {
    let re = Regex::new(r#""stream"\s*:\s*"([^"]*)""#).expect("valid stream regex");
    re.captures(fragment).map(|cap| cap[1].to_string())
}

/// Extract the given primary-key values from a record fragment.
///
/// Keys that cannot be located map to [`MISSING`].
pub fn extract_primary_keys(fragment: &str, pk_fields: &[String]) -> BTreeMap<String, String> {
    let parsed: Option<Value> = serde_json::from_str(fragment).ok();
    let data = parsed.as_ref().and_then(|doc| doc.get("data"));

    pk_fields
        .iter()
        .map(|field| {
            let value = match data.and_then(|d| d.get(field)) {
                Some(v) => Some(scalar_to_string(v)),
                None => scan_for_key(fragment, field),
            };
            (field.clone(), value.unwrap_or_else(|| MISSING.to_string()))
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scan_for_key(fragment: &str, field: &str) -> Option<String> {
    let pattern = format!(
        r#""{}"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false|null)"#,
        regex::escape(field)
    );
    let re = Regex::new(&pattern).ok()?;
    let raw = re.captures(fragment).map(|cap| cap[1].to_string())?;
    Some(raw.trim_matches('"').to_string())
}
