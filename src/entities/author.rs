use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{count_at, string_at};
use crate::query::{json_path, JsonPath};

static ID: LazyLock<JsonPath> = json_path!("$.rest_id");
static CREATED_AT: LazyLock<JsonPath> = json_path!("$.legacy.created_at");
static HANDLE: LazyLock<JsonPath> = json_path!("$.legacy.screen_name");
static NAME: LazyLock<JsonPath> = json_path!("$.legacy.name");
static DESCRIPTION: LazyLock<JsonPath> = json_path!("$.legacy.description");
static LOCATION: LazyLock<JsonPath> = json_path!("$.legacy.location");
static FAVORITES: LazyLock<JsonPath> = json_path!("$.legacy.favourites_count");
static FOLLOWERS: LazyLock<JsonPath> = json_path!("$.legacy.followers_count");
static NORMAL_FOLLOWERS: LazyLock<JsonPath> = json_path!("$.legacy.normal_followers_count");
static FRIENDS: LazyLock<JsonPath> = json_path!("$.legacy.friends_count");
static LISTED: LazyLock<JsonPath> = json_path!("$.legacy.listed_count");
static STATUSES: LazyLock<JsonPath> = json_path!("$.legacy.statuses_count");

/// An account record.
///
/// Counters default to zero when the platform omits them; text fields stay
/// `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: Option<String>,
    pub created_at: Option<String>,
    pub handle: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,

    pub favorites: u64,
    pub followers: u64,
    pub friends: u64,
    pub listed: u64,
    pub statuses: u64,
}

impl Author {
    /// Build an author from a `user_results.result`-shaped record.
    ///
    /// There is no discriminator check: callers only hand in values already
    /// located as user records.
    #[must_use]
    pub fn from_raw(record: &Value) -> Self {
        Self {
            id: string_at(&ID, record),
            created_at: string_at(&CREATED_AT, record),
            handle: string_at(&HANDLE, record),
            name: string_at(&NAME, record),
            description: string_at(&DESCRIPTION, record),
            location: string_at(&LOCATION, record),

            favorites: count_at(&FAVORITES, record).unwrap_or(0),
            followers: count_at(&FOLLOWERS, record)
                .or_else(|| count_at(&NORMAL_FOLLOWERS, record))
                .unwrap_or(0),
            friends: count_at(&FRIENDS, record).unwrap_or(0),
            listed: count_at(&LISTED, record).unwrap_or(0),
            statuses: count_at(&STATUSES, record).unwrap_or(0),
        }
    }

    /// Whether `handle` names this account (case-insensitive, `@` optional).
    #[must_use]
    pub fn has_handle(&self, handle: &str) -> bool {
        self.handle
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(handle.trim_start_matches('@')))
    }
}
