//! End-to-end harvesting flows against the scripted browser.

use std::time::Duration;

use chrono::DateTime;
use serde_json::{json, Value};
use tokio::time::Instant;

use feed_harvester::browser::{json_response, ScriptedBrowser};
use feed_harvester::constants::{
    RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER,
    SHOW_REPLIES_LABEL, USERNAME_SELECTOR,
};
use feed_harvester::entities::{posts_from_raw, Author};
use feed_harvester::filters::DateWindow;
use feed_harvester::harvester::rate_limit::RateLimitPolicy;
use feed_harvester::harvester::target::{PostRef, SearchQuery};
use feed_harvester::harvester::{
    AuthorPostsOptions, HarvestSettings, Harvester, RepliesOptions, SessionCredentials,
    SessionPhase,
};
use feed_harvester::HarvestError;

const USER_TWEETS: &str = "https://x.com/i/api/graphql/E3opETHurmVJflFsUBVuUQ/UserTweets?variables=%7B%7D";
const SEARCH: &str = "https://x.com/i/api/graphql/nK1dw4oV3k4w5TdtcAdSww/SearchTimeline?variables=%7B%7D";
const DETAIL: &str = "https://x.com/i/api/graphql/xOhkmRac04YFZmOzU9PJHg/TweetDetail?variables=%7B%7D";
const USER_BY_NAME: &str = "https://x.com/i/api/graphql/G3KGOASz96M-Qu0nwmGXNg/UserByScreenName?variables=%7B%7D";

fn tweet(id: &str, created_at: &str) -> Value {
    json!({
        "__typename": "Tweet",
        "rest_id": id,
        "core": {"user_results": {"result": {"legacy": {"screen_name": "nasa"}}}},
        "legacy": {"id_str": id, "full_text": format!("post {id}"), "created_at": created_at}
    })
}

fn reply(id: &str, created_at: &str) -> Value {
    let mut record = tweet(id, created_at);
    record["legacy"]["in_reply_to_status_id_str"] = json!("1");
    record
}

fn entry(record: Value) -> Value {
    json!({"content": {"itemContent": {"tweet_results": {"result": record}}}})
}

fn timeline(records: Vec<Value>) -> Value {
    let entries: Vec<Value> = records.into_iter().map(entry).collect();
    json!({"data": {"timeline": {"instructions": [{"entries": entries}]}}})
}

fn ids(records: &[Value]) -> Vec<String> {
    posts_from_raw(records)
        .into_iter()
        .filter_map(|p| p.id)
        .collect()
}

fn harvester(browser: &ScriptedBrowser) -> Harvester<ScriptedBrowser> {
    Harvester::new(browser.clone(), HarvestSettings::immediate())
}

#[tokio::test]
async fn test_unchanged_height_terminates_after_one_scroll() {
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 100])
        .on_navigate(USER_TWEETS, timeline(vec![tweet("10", "Wed Oct 10 20:19:24 +0000 2018")]));
    let mut harvester = harvester(&browser);

    let records = harvester
        .fetch_author_posts("nasa", &AuthorPostsOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&records), vec!["10"]);
    assert_eq!(browser.log().scrolls, 1);
    assert_eq!(harvester.phase(), SessionPhase::Extracted);
}

#[tokio::test]
async fn test_author_posts_remove_replies() {
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200, 200])
        .on_navigate(
            USER_TWEETS,
            timeline(vec![
                tweet("10", "Wed Oct 10 20:19:24 +0000 2018"),
                reply("11", "Wed Oct 10 20:18:00 +0000 2018"),
            ]),
        )
        .on_scroll(vec![json_response(
            USER_TWEETS,
            timeline(vec![tweet("12", "Wed Oct 10 19:00:00 +0000 2018")]),
        )]);
    let mut harvester = harvester(&browser);

    let records = harvester
        .fetch_author_posts("@nasa", &AuthorPostsOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&records), vec!["10", "12"]);
    let log = browser.log();
    assert_eq!(log.scrolls, 2);
    assert_eq!(log.navigations, vec!["https://twitter.com/nasa"]);
}

#[tokio::test]
async fn test_author_posts_stop_at_date_window_and_filter() {
    let window = DateWindow::new(
        DateTime::parse_from_rfc3339("2018-10-10T00:00:00+00:00").unwrap(),
        DateTime::parse_from_rfc3339("2018-10-10T23:59:59+00:00").unwrap(),
    );
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200, 300, 400])
        .on_navigate(
            USER_TWEETS,
            timeline(vec![
                tweet("12", "Thu Oct 11 08:00:00 +0000 2018"),
                tweet("11", "Wed Oct 10 08:00:00 +0000 2018"),
            ]),
        )
        .on_scroll(vec![json_response(
            USER_TWEETS,
            timeline(vec![tweet("10", "Tue Oct 09 08:00:00 +0000 2018")]),
        )])
        .on_scroll(vec![json_response(
            USER_TWEETS,
            timeline(vec![tweet("9", "Mon Oct 08 08:00:00 +0000 2018")]),
        )]);
    let mut harvester = harvester(&browser);

    let options = AuthorPostsOptions {
        window: Some(window),
        ..AuthorPostsOptions::default()
    };
    let records = harvester.fetch_author_posts("nasa", &options).await.unwrap();

    assert_eq!(ids(&records), vec!["11"]);
    assert_eq!(browser.log().scrolls, 1);
}

#[tokio::test]
async fn test_page_cap_and_count() {
    let page = |id: &str| {
        json_response(
            SEARCH,
            timeline(vec![tweet(id, "Wed Oct 10 20:19:24 +0000 2018")]),
        )
    };
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200, 300, 400, 500])
        .on_navigate_raw(page("1"))
        .on_scroll(vec![page("2")])
        .on_scroll(vec![page("3")])
        .on_scroll(vec![page("4")]);
    let mut harvester = harvester(&browser);

    let query = SearchQuery::new("rust");
    let records = harvester.fetch_search_timeline(&query, Some(2)).await.unwrap();

    assert_eq!(ids(&records), vec!["1", "2"]);
    assert_eq!(browser.log().scrolls, 1);
    assert!(browser.log().navigations[0].starts_with("https://twitter.com/search?q=rust"));
}

#[tokio::test]
async fn test_post_detail_returns_first_post() {
    let browser = ScriptedBrowser::new().on_navigate(
        DETAIL,
        timeline(vec![
            tweet("42", "Wed Oct 10 20:19:24 +0000 2018"),
            reply("43", "Wed Oct 10 20:20:24 +0000 2018"),
        ]),
    );
    let mut harvester = harvester(&browser);

    let record = harvester
        .fetch_post_detail(&PostRef::parse("https://x.com/nasa/status/42"))
        .await
        .unwrap();

    assert_eq!(record["rest_id"], "42");
    assert_eq!(browser.log().scrolls, 0);
}

#[tokio::test]
async fn test_post_detail_without_posts_is_not_found() {
    let browser = ScriptedBrowser::new().on_navigate(DETAIL, json!({"data": {}}));
    let mut harvester = harvester(&browser);

    let err = harvester
        .fetch_post_detail(&PostRef::Id("42".into()))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(browser.log().navigations, vec!["https://twitter.com/i/status/42"]);
}

#[tokio::test]
async fn test_replies_drop_original_and_promotions() {
    let body = json!({"data": {"instructions": [{"entries": [
        entry(tweet("42", "Wed Oct 10 20:19:24 +0000 2018")),
        entry(reply("43", "Wed Oct 10 20:20:24 +0000 2018")),
        {"content": {"itemContent": {
            "promotedMetadata": {"advertiser_results": {}},
            "tweet_results": {"result": tweet("99", "Wed Oct 10 20:21:24 +0000 2018")}
        }}},
        {"content": {
            "clientEventInfo": {"component": "related_tweet"},
            "itemContent": {"tweet_results": {"result": tweet("98", "Wed Oct 10 20:22:24 +0000 2018")}}
        }},
        entry(reply("44", "Wed Oct 10 20:23:24 +0000 2018")),
    ]}]}});
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 100])
        .with_buttons(SHOW_REPLIES_LABEL, [2, 1])
        .on_navigate(DETAIL, body);
    let mut harvester = harvester(&browser);

    let options = RepliesOptions {
        expand_replies: true,
        ..RepliesOptions::default()
    };
    let records = harvester
        .fetch_post_replies(&PostRef::Id("42".into()), &options)
        .await
        .unwrap();

    assert_eq!(ids(&records), vec!["43", "44"]);
    assert_eq!(browser.log().clicks.len(), 3);
}

#[tokio::test]
async fn test_replies_count() {
    let body = timeline(vec![
        tweet("42", "Wed Oct 10 20:19:24 +0000 2018"),
        reply("43", "Wed Oct 10 20:20:24 +0000 2018"),
        reply("44", "Wed Oct 10 20:21:24 +0000 2018"),
    ]);
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 100])
        .on_navigate(DETAIL, body);
    let mut harvester = harvester(&browser);

    let options = RepliesOptions {
        count: Some(1),
        ..RepliesOptions::default()
    };
    let records = harvester
        .fetch_post_replies(&PostRef::Id("42".into()), &options)
        .await
        .unwrap();

    assert_eq!(ids(&records), vec!["43"]);
}

#[tokio::test]
async fn test_resolve_author() {
    let browser = ScriptedBrowser::new().on_navigate(
        USER_BY_NAME,
        json!({"data": {"user": {"result": {
            "rest_id": "11348282",
            "legacy": {"screen_name": "NASA", "followers_count": 88_000_000}
        }}}}),
    );
    let mut harvester = harvester(&browser);

    let record = harvester.resolve_author("nasa").await.unwrap().unwrap();
    let author = Author::from_raw(&record);

    assert!(author.has_handle("@nasa"));
    assert_eq!(author.followers, 88_000_000);
    assert_eq!(browser.log().selectors_waited, vec![USERNAME_SELECTOR]);
}

#[tokio::test]
async fn test_resolve_unknown_author() {
    let browser = ScriptedBrowser::new().on_navigate(USER_BY_NAME, json!({"data": {}}));
    let mut harvester = harvester(&browser);

    assert_eq!(harvester.resolve_author("nobody").await.unwrap(), None);
}

#[tokio::test]
async fn test_missing_selector_times_out() {
    let browser = ScriptedBrowser::new().without_selector(USERNAME_SELECTOR);
    let mut harvester = harvester(&browser);

    let err = harvester.resolve_author("nasa").await.unwrap_err();
    assert!(matches!(err, HarvestError::SelectorTimeout { .. }));
}

#[tokio::test]
async fn test_new_operation_replaces_page_and_close_is_idempotent() {
    let browser = ScriptedBrowser::new();
    let settings = HarvestSettings {
        credentials: Some(SessionCredentials::new("token", "csrf")),
        ..HarvestSettings::immediate()
    };
    let mut harvester = Harvester::new(browser.clone(), settings);

    harvester.resolve_author("a").await.unwrap();
    harvester.resolve_author("b").await.unwrap();
    let log = browser.log();
    assert_eq!(log.pages_opened, 2);
    assert_eq!(log.pages_closed, 1);
    assert_eq!(log.cookies.len(), 8);

    harvester.close().await.unwrap();
    harvester.close().await.unwrap();
    let log = browser.log();
    assert_eq!(log.pages_closed, 2);
    assert!(log.browser_closed);
    assert_eq!(harvester.phase(), SessionPhase::Idle);
    assert!(harvester.resolve_author("c").await.is_err());
}

#[tokio::test]
async fn test_rate_limit_headers_are_tracked() {
    let mut response = json_response(
        USER_TWEETS,
        timeline(vec![tweet("10", "Wed Oct 10 20:19:24 +0000 2018")]),
    );
    response.headers.insert(RATE_LIMIT_LIMIT_HEADER.into(), "50".into());
    response.headers.insert(RATE_LIMIT_REMAINING_HEADER.into(), "47".into());
    response.headers.insert(RATE_LIMIT_RESET_HEADER.into(), "1700000000".into());
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 100])
        .on_navigate_raw(response);
    let mut harvester = harvester(&browser);

    harvester
        .fetch_author_posts("nasa", &AuthorPostsOptions::default())
        .await
        .unwrap();

    let limits = harvester.rate_limits();
    assert_eq!(limits.remaining, Some(47));
    assert_eq!(limits.used(), Some(3));
}

#[tokio::test]
async fn test_exhausted_rate_limit_surfaces() {
    let mut response = json_response(
        USER_TWEETS,
        timeline(vec![tweet("10", "Wed Oct 10 20:19:24 +0000 2018")]),
    );
    response.headers.insert(RATE_LIMIT_LIMIT_HEADER.into(), "50".into());
    response.headers.insert(RATE_LIMIT_REMAINING_HEADER.into(), "1".into());
    let far_reset = chrono::Utc::now().timestamp() + 3 * 3600;
    response
        .headers
        .insert(RATE_LIMIT_RESET_HEADER.into(), far_reset.to_string());
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200])
        .on_navigate_raw(response);
    let mut harvester = harvester(&browser);

    let err = harvester
        .fetch_author_posts("nasa", &AuthorPostsOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::RateLimitExhausted { reset, .. } if reset == far_reset));
    assert_eq!(browser.log().scrolls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_pause_halts_then_resumes_scrolling() {
    let mut response = json_response(
        USER_TWEETS,
        timeline(vec![tweet("10", "Wed Oct 10 20:19:24 +0000 2018")]),
    );
    // Ten requests used out of fifty: a periodic pause is due.
    response.headers.insert(RATE_LIMIT_LIMIT_HEADER.into(), "50".into());
    response.headers.insert(RATE_LIMIT_REMAINING_HEADER.into(), "40".into());
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200, 200])
        .on_navigate_raw(response);
    let settings = HarvestSettings {
        rate_limits: RateLimitPolicy {
            responses_wait: Duration::from_secs(1),
            ..RateLimitPolicy::default()
        },
        ..HarvestSettings::immediate()
    };
    let mut harvester = Harvester::new(browser.clone(), settings);

    let started = Instant::now();
    let records = harvester
        .fetch_author_posts("nasa", &AuthorPostsOptions::default())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(ids(&records), vec!["10"]);
    assert_eq!(browser.log().scrolls, 2);
    assert_eq!(harvester.phase(), SessionPhase::Extracted);
}

#[tokio::test]
async fn test_page_query_failure_is_not_an_empty_page() {
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200])
        .with_query_error("target closed")
        .on_navigate(DETAIL, timeline(vec![tweet("42", "Wed Oct 10 20:19:24 +0000 2018")]));
    let mut harvester = harvester(&browser);

    let options = RepliesOptions {
        expand_replies: true,
        ..RepliesOptions::default()
    };
    let err = harvester
        .fetch_post_replies(&PostRef::Id("42".into()), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Browser(ref message) if message == "target closed"));
    assert_eq!(browser.log().scrolls, 0);
}

#[tokio::test]
async fn test_spinner_count_failure_stops_scrolling() {
    let browser = ScriptedBrowser::new()
        .with_scroll_heights([100, 200])
        .with_query_error("target closed")
        .on_navigate(USER_TWEETS, timeline(vec![tweet("10", "Wed Oct 10 20:19:24 +0000 2018")]));
    let mut harvester = harvester(&browser);

    let err = harvester
        .fetch_author_posts("nasa", &AuthorPostsOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::Browser(_)));
}
