//! Typed entities extracted from raw response records.

mod author;
mod post;

pub use author::Author;
pub use post::{posts_from_raw, Post, POST_TYPENAME};

use serde_json::Value;

use crate::query::JsonPath;

/// First match as an owned string. Non-string scalars are rendered.
pub(crate) fn string_at(path: &JsonPath, record: &Value) -> Option<String> {
    match path.first(record)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First match as a counter. Accepts numbers and numeric strings; a present
/// zero stays `Some(0)`.
pub(crate) fn count_at(path: &JsonPath, record: &Value) -> Option<u64> {
    match path.first(record)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Every string match, in document order.
pub(crate) fn strings_at(path: &JsonPath, record: &Value) -> Vec<String> {
    path.find(record)
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}
