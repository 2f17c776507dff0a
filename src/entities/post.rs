use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{count_at, string_at, strings_at, Author};
use crate::query::{json_path, JsonPath};
use crate::timestamp::parse_platform_timestamp;

/// Discriminator of genuine post records.
pub const POST_TYPENAME: &str = "Tweet";

static TYPENAME: LazyLock<JsonPath> = json_path!("$.__typename");
static AUTHOR: LazyLock<JsonPath> = json_path!("$.core.user_results.result");
static ID: LazyLock<JsonPath> = json_path!("$.legacy.id_str");
static TEXT: LazyLock<JsonPath> = json_path!("$.legacy.full_text");
static CREATED_AT: LazyLock<JsonPath> = json_path!("$.legacy.created_at");
static IN_REPLY_TO: LazyLock<JsonPath> = json_path!("$.legacy.in_reply_to_status_id_str");
static QUOTED: LazyLock<JsonPath> = json_path!("$.legacy.quoted_status_id_str");
static REPOSTED: LazyLock<JsonPath> =
    json_path!("$.legacy.retweeted_status_result.result.rest_id");

static FAVORITES: LazyLock<JsonPath> = json_path!("$.legacy.favorite_count");
static BOOKMARKS: LazyLock<JsonPath> = json_path!("$.legacy.bookmark_count");
static QUOTES: LazyLock<JsonPath> = json_path!("$.legacy.quote_count");
static REPLIES: LazyLock<JsonPath> = json_path!("$.legacy.reply_count");
static REPOSTS: LazyLock<JsonPath> = json_path!("$.legacy.retweet_count");
static VIEWS: LazyLock<JsonPath> = json_path!("$.views.count");

static MEDIA: LazyLock<JsonPath> = json_path!("$.legacy.entities.media[*].media_url_https");
static HASHTAGS: LazyLock<JsonPath> = json_path!("$.legacy.entities.hashtags[*].text");
static URLS: LazyLock<JsonPath> = json_path!("$.legacy.entities.urls[*].expanded_url");
static MENTIONS: LazyLock<JsonPath> =
    json_path!("$.legacy.entities.user_mentions[*].screen_name");

/// A post extracted from a `tweet_results.result` record.
///
/// Counters are `None` when the platform omits them and keep a reported zero
/// as `Some(0)`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub typename: Option<String>,

    pub id: Option<String>,
    pub author: Option<Author>,
    pub text: Option<String>,
    pub created_at: Option<String>,
    /// `created_at` parsed, in the offset the platform served.
    pub created: Option<DateTime<FixedOffset>>,
    pub in_reply_to_id: Option<String>,
    pub quoted_id: Option<String>,
    pub reposted_id: Option<String>,

    pub favorites: Option<u64>,
    pub bookmarks: Option<u64>,
    pub quotes: Option<u64>,
    pub replies: Option<u64>,
    pub reposts: Option<u64>,
    pub views: Option<u64>,

    pub media: Vec<String>,
    pub hashtags: Vec<String>,
    pub urls: Vec<String>,
    pub mentions: Vec<String>,
}

impl Post {
    /// Build a post from a raw record.
    ///
    /// Records that are not genuine posts (tombstones, ads, module items) only
    /// get their `typename` set; check [`Post::is_valid`] before use.
    #[must_use]
    pub fn from_raw(record: &Value) -> Self {
        let typename = string_at(&TYPENAME, record);
        if typename.as_deref() != Some(POST_TYPENAME) {
            return Self {
                typename,
                ..Self::default()
            };
        }

        let created_at = string_at(&CREATED_AT, record);
        let created = created_at
            .as_deref()
            .and_then(|value| match parse_platform_timestamp(value) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    debug!(error = %e, "Unparseable post timestamp");
                    None
                }
            });

        Self {
            typename,
            id: string_at(&ID, record),
            author: AUTHOR.first(record).map(Author::from_raw),
            text: string_at(&TEXT, record),
            created_at,
            created,
            in_reply_to_id: string_at(&IN_REPLY_TO, record),
            quoted_id: string_at(&QUOTED, record),
            reposted_id: string_at(&REPOSTED, record),

            favorites: count_at(&FAVORITES, record),
            bookmarks: count_at(&BOOKMARKS, record),
            quotes: count_at(&QUOTES, record),
            replies: count_at(&REPLIES, record),
            reposts: count_at(&REPOSTS, record),
            views: count_at(&VIEWS, record),

            media: strings_at(&MEDIA, record),
            hashtags: strings_at(&HASHTAGS, record),
            urls: strings_at(&URLS, record),
            mentions: strings_at(&MENTIONS, record),
        }
    }

    /// Whether this was built from a genuine post record.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.typename.as_deref() == Some(POST_TYPENAME)
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.in_reply_to_id.is_some()
    }

    /// Creation time expressed in the reporting `offset`.
    #[must_use]
    pub fn created_in(&self, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        self.created.map(|c| c.with_timezone(&offset))
    }
}

/// Parse raw records, keeping only genuine posts in their original order.
#[must_use]
pub fn posts_from_raw(records: &[Value]) -> Vec<Post> {
    records
        .iter()
        .map(Post::from_raw)
        .filter(Post::is_valid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    fn raw_post() -> Value {
        json!({
            "__typename": "Tweet",
            "rest_id": "1050118621198921728",
            "core": {"user_results": {"result": {
                "__typename": "User",
                "rest_id": "783214",
                "legacy": {"screen_name": "Twitter", "followers_count": 10}
            }}},
            "views": {"count": "1234", "state": "EnabledWithCount"},
            "legacy": {
                "id_str": "1050118621198921728",
                "full_text": "To make room for more expression #hello",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "favorite_count": 0,
                "bookmark_count": 3,
                "quote_count": 1,
                "reply_count": 2,
                "retweet_count": 5,
                "in_reply_to_status_id_str": null,
                "entities": {
                    "hashtags": [{"text": "hello"}],
                    "urls": [{"expanded_url": "https://blog.twitter.com/"}],
                    "user_mentions": [{"screen_name": "jack"}, {"screen_name": "biz"}],
                    "media": [{"media_url_https": "https://pbs.twimg.com/media/a.jpg"}]
                }
            }
        })
    }

    #[test]
    fn test_from_raw() {
        let post = Post::from_raw(&raw_post());

        assert!(post.is_valid());
        assert_eq!(post.id.as_deref(), Some("1050118621198921728"));
        assert_eq!(post.author.as_ref().and_then(|a| a.handle.as_deref()), Some("Twitter"));
        assert_eq!(post.views, Some(1234));
        assert_eq!(post.reposts, Some(5));
        assert_eq!(post.hashtags, vec!["hello"]);
        assert_eq!(post.mentions, vec!["jack", "biz"]);
        assert_eq!(post.media.len(), 1);
        assert!(!post.is_reply());
        assert!(post.created.is_some());
    }

    #[test]
    fn test_zero_counter_is_not_missing() {
        let post = Post::from_raw(&raw_post());
        assert_eq!(post.favorites, Some(0));
    }

    #[test]
    fn test_missing_counters_are_none() {
        let post = Post::from_raw(&json!({"__typename": "Tweet", "legacy": {"id_str": "1"}}));
        assert!(post.is_valid());
        assert_eq!(post.favorites, None);
        assert_eq!(post.views, None);
        assert!(post.media.is_empty());
        assert!(post.author.is_none());
    }

    #[test]
    fn test_non_post_short_circuits() {
        let mut raw = raw_post();
        raw["__typename"] = json!("TweetTombstone");
        let post = Post::from_raw(&raw);

        assert!(!post.is_valid());
        assert_eq!(post.typename.as_deref(), Some("TweetTombstone"));
        assert_eq!(post.id, None);
        assert_eq!(post.reposts, None);
        assert!(post.hashtags.is_empty());
    }

    #[test]
    fn test_created_in_offset() {
        let post = Post::from_raw(&raw_post());
        let local = post.created_in(FixedOffset::east_opt(7 * 3600).unwrap()).unwrap();
        assert_eq!(local.hour(), 3);
    }

    #[test]
    fn test_posts_from_raw_skips_invalid() {
        let records = vec![raw_post(), json!({"__typename": "TimelineTimelineCursor"}), raw_post()];
        assert_eq!(posts_from_raw(&records).len(), 2);
    }
}
