//! Page URLs the harvester navigates to.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::constants::PLATFORM_BASE_URL;

/// Pattern to extract a post id from a URL.
static POST_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status(?:es)?/(\d+)").unwrap());

/// A post given either by id or by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostRef {
    Id(String),
    Url(String),
}

impl PostRef {
    /// Interpret user input: all digits is an id, anything else a URL.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            Self::Id(input.to_string())
        } else {
            Self::Url(input.to_string())
        }
    }

    /// The post id, if one can be determined.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            Self::Url(url) => POST_ID_PATTERN
                .captures(url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str()),
        }
    }

    /// The page to open for this post.
    #[must_use]
    pub fn url(&self) -> String {
        match self {
            Self::Id(id) => post_url(id),
            Self::Url(url) => url.clone(),
        }
    }
}

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.write_str(id),
            Self::Url(url) => f.write_str(url),
        }
    }
}

#[must_use]
pub fn post_url(id: &str) -> String {
    format!("{PLATFORM_BASE_URL}/i/status/{id}")
}

#[must_use]
pub fn profile_url(handle: &str) -> String {
    format!("{PLATFORM_BASE_URL}/{}", handle.trim_start_matches('@'))
}

/// A search-timeline query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    /// Only posts by this account.
    pub from_handle: Option<String>,
    /// Only posts before this day.
    pub until: Option<NaiveDate>,
    /// Only posts from this day on.
    pub since: Option<NaiveDate>,
    pub include_replies: bool,
}

impl SearchQuery {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            include_replies: true,
            ..Self::default()
        }
    }

    /// The query as typed into the search box.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if !self.text.trim().is_empty() {
            parts.push(self.text.trim().to_string());
        }
        if let Some(ref handle) = self.from_handle {
            parts.push(format!("(from:{})", handle.trim_start_matches('@')));
        }
        if let Some(until) = self.until {
            parts.push(format!("until:{}", until.format("%Y-%m-%d")));
        }
        if let Some(since) = self.since {
            parts.push(format!("since:{}", since.format("%Y-%m-%d")));
        }
        if !self.include_replies {
            parts.push("-filter:replies".to_string());
        }
        parts.join(" ")
    }

    /// Latest-first search results page.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{PLATFORM_BASE_URL}/search?q={}&src=typed_query&f=live",
            urlencoding::encode(&self.to_query_string())
        )
    }
}
