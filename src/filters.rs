//! Filters over raw post records.
//!
//! Every filter borrows its input and returns a new vector, preserving order.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use crate::query::{json_path, JsonPath};
use crate::timestamp::parse_platform_timestamp;

static IN_REPLY_TO: LazyLock<JsonPath> = json_path!("$.legacy.in_reply_to_status_id_str");
static REPOSTED: LazyLock<JsonPath> = json_path!("$.legacy.retweeted_status_result");
static QUOTED: LazyLock<JsonPath> = json_path!("$.legacy.quoted_status_id_str");
static AUTHOR_HANDLE: LazyLock<JsonPath> =
    json_path!("$.core.user_results.result.legacy.screen_name");
static CREATED_AT: LazyLock<JsonPath> = json_path!("$.legacy.created_at");

/// Closed time interval used by date filtering and scroll termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DateWindow {
    #[must_use]
    pub const fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    /// Inclusive on both bounds.
    #[must_use]
    pub fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        self.start <= *at && *at <= self.end
    }
}

fn retain(records: &[Value], keep: impl Fn(&Value) -> bool) -> Vec<Value> {
    records.iter().filter(|r| keep(r)).cloned().collect()
}

/// Drop records that reply to another post.
#[must_use]
pub fn remove_replies(records: &[Value]) -> Vec<Value> {
    retain(records, |r| !IN_REPLY_TO.exists(r))
}

/// Drop reposts.
#[must_use]
pub fn remove_reposts(records: &[Value]) -> Vec<Value> {
    retain(records, |r| !REPOSTED.exists(r))
}

/// Drop quote-posts.
#[must_use]
pub fn remove_quotes(records: &[Value]) -> Vec<Value> {
    retain(records, |r| !QUOTED.exists(r))
}

/// Keep records authored by `handle` (case-insensitive, `@` optional).
#[must_use]
pub fn filter_by_author_handle(records: &[Value], handle: &str) -> Vec<Value> {
    let handle = handle.trim_start_matches('@');
    retain(records, |r| {
        AUTHOR_HANDLE
            .first(r)
            .and_then(Value::as_str)
            .is_some_and(|own| own.eq_ignore_ascii_case(handle))
    })
}

/// Keep records created within `window`.
///
/// The first `created_at` match is authoritative. Records without a parseable
/// timestamp are dropped.
#[must_use]
pub fn filter_by_date(records: &[Value], window: &DateWindow) -> Vec<Value> {
    retain(records, |r| {
        created_at(r).is_some_and(|at| window.contains(&at))
    })
}

/// Keep the first `count` records.
#[must_use]
pub fn filter_by_count(records: &[Value], count: usize) -> Vec<Value> {
    records.iter().take(count).cloned().collect()
}

pub(crate) fn created_at(record: &Value) -> Option<DateTime<FixedOffset>> {
    CREATED_AT
        .first(record)
        .and_then(Value::as_str)
        .and_then(|s| parse_platform_timestamp(s).ok())
}
