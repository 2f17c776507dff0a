use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use thiserror::Error;

use crate::browser::BrowserSettings;
use crate::filters::DateWindow;
use crate::harvester::rate_limit::RateLimitPolicy;
use crate::harvester::{HarvestSettings, SessionCredentials};
use crate::timestamp::reporting_offset;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Harvester configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    // Session
    pub auth_token: String,
    pub ct0: String,

    // Pacing
    pub scroll_delay_min_secs: u64,
    pub scroll_delay_max_secs: u64,

    // Rate limits
    pub responses_wait_count: u32,
    pub responses_wait: Duration,
    pub rate_limit_stop: u32,
    pub max_rate_limit_wait: Duration,

    // Timeouts
    pub navigation_timeout: Duration,
    pub spinner_timeout: Duration,

    // Output
    pub page_cap: Option<usize>,
    pub result_cap: Option<usize>,
    pub report_tz_offset_hours: i32,

    // Targeting
    /// First day of the date window, in the reporting offset.
    pub window_start: Option<NaiveDate>,
    /// Last day of the date window, inclusive.
    pub window_end: Option<NaiveDate>,
    pub include_replies: bool,
    pub expand_replies: bool,
    pub expand_additional: bool,

    // Browser
    pub headless: bool,
    pub chrome_path: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("auth_token", &"[REDACTED]")
            .field("ct0", &"[REDACTED]")
            .field("scroll_delay_min_secs", &self.scroll_delay_min_secs)
            .field("scroll_delay_max_secs", &self.scroll_delay_max_secs)
            .field("responses_wait_count", &self.responses_wait_count)
            .field("responses_wait", &self.responses_wait)
            .field("rate_limit_stop", &self.rate_limit_stop)
            .field("max_rate_limit_wait", &self.max_rate_limit_wait)
            .field("navigation_timeout", &self.navigation_timeout)
            .field("spinner_timeout", &self.spinner_timeout)
            .field("page_cap", &self.page_cap)
            .field("result_cap", &self.result_cap)
            .field("report_tz_offset_hours", &self.report_tz_offset_hours)
            .field("window_start", &self.window_start)
            .field("window_end", &self.window_end)
            .field("include_replies", &self.include_replies)
            .field("expand_replies", &self.expand_replies)
            .field("expand_additional", &self.expand_additional)
            .field("headless", &self.headless)
            .field("chrome_path", &self.chrome_path)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Session
            auth_token: required_env("AUTH_TOKEN")?,
            ct0: required_env("CT0")?,

            // Pacing
            scroll_delay_min_secs: parse_env_u64("SCROLL_DELAY_MIN_SECS", 7)?,
            scroll_delay_max_secs: parse_env_u64("SCROLL_DELAY_MAX_SECS", 10)?,

            // Rate limits
            responses_wait_count: parse_env_u32("RESPONSES_WAIT_COUNT", 10)?,
            responses_wait: Duration::from_secs(parse_env_u64("RESPONSES_WAIT_SECS", 60)?),
            rate_limit_stop: parse_env_u32("RATE_LIMIT_STOP", 5)?,
            max_rate_limit_wait: Duration::from_secs(parse_env_u64(
                "MAX_RATE_LIMIT_WAIT_SECS",
                1200,
            )?),

            // Timeouts
            navigation_timeout: Duration::from_millis(parse_env_u64("NAVIGATION_TIMEOUT_MS", 30_000)?),
            spinner_timeout: Duration::from_secs(parse_env_u64("SPINNER_TIMEOUT_SECS", 120)?),

            // Output
            page_cap: parse_env_opt_usize("PAGE_CAP")?,
            result_cap: parse_env_opt_usize("RESULT_CAP")?,
            report_tz_offset_hours: parse_env_i32("REPORT_TZ_OFFSET_HOURS", 0)?,

            // Targeting
            window_start: parse_env_date("WINDOW_START")?,
            window_end: parse_env_date("WINDOW_END")?,
            include_replies: parse_env_bool("INCLUDE_REPLIES", true)?,
            expand_replies: parse_env_bool("EXPAND_REPLIES", true)?,
            expand_additional: parse_env_bool("EXPAND_ADDITIONAL", true)?,

            // Browser
            headless: parse_env_bool("HEADLESS", true)?,
            chrome_path: optional_env("CHROME_PATH"),
        })
    }

    /// Defaults with placeholder credentials.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            auth_token: "test-auth-token".to_string(),
            ct0: "test-ct0".to_string(),
            scroll_delay_min_secs: 0,
            scroll_delay_max_secs: 0,
            responses_wait_count: 10,
            responses_wait: Duration::from_secs(60),
            rate_limit_stop: 5,
            max_rate_limit_wait: Duration::from_secs(1200),
            navigation_timeout: Duration::from_secs(30),
            spinner_timeout: Duration::from_secs(120),
            page_cap: None,
            result_cap: None,
            report_tz_offset_hours: 0,
            window_start: None,
            window_end: None,
            include_replies: true,
            expand_replies: true,
            expand_additional: true,
            headless: true,
            chrome_path: None,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_token.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "AUTH_TOKEN".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.ct0.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CT0".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.scroll_delay_min_secs > self.scroll_delay_max_secs {
            return Err(ConfigError::InvalidValue {
                name: "SCROLL_DELAY_MIN_SECS".to_string(),
                message: format!(
                    "must not exceed SCROLL_DELAY_MAX_SECS ({})",
                    self.scroll_delay_max_secs
                ),
            });
        }
        if self.responses_wait_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RESPONSES_WAIT_COUNT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if reporting_offset(self.report_tz_offset_hours).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "REPORT_TZ_OFFSET_HOURS".to_string(),
                message: format!("must be within ±23, got {}", self.report_tz_offset_hours),
            });
        }
        match (self.window_start, self.window_end) {
            (Some(start), Some(end)) if start > end => {
                return Err(ConfigError::InvalidValue {
                    name: "WINDOW_START".to_string(),
                    message: format!("must not be after WINDOW_END ({end})"),
                });
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    name: "WINDOW_START".to_string(),
                    message: "WINDOW_START and WINDOW_END must be set together".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            credentials: Some(SessionCredentials::new(&self.auth_token, &self.ct0)),
            delay_secs: (self.scroll_delay_min_secs, self.scroll_delay_max_secs),
            rate_limits: RateLimitPolicy {
                responses_wait_count: self.responses_wait_count,
                responses_wait: self.responses_wait,
                rate_limit_stop: self.rate_limit_stop,
                max_wait: self.max_rate_limit_wait,
            },
            navigation_timeout: self.navigation_timeout,
            spinner_timeout: self.spinner_timeout,
            ..HarvestSettings::default()
        }
    }

    #[must_use]
    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            request_timeout: self.navigation_timeout,
            ..BrowserSettings::default()
        }
    }

    /// The configured date window: from the start of `WINDOW_START` to the
    /// end of `WINDOW_END`, both in the reporting offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the reporting offset is out of range or a bound
    /// does not exist in it.
    pub fn date_window(&self) -> Result<Option<DateWindow>, ConfigError> {
        let (Some(start), Some(end)) = (self.window_start, self.window_end) else {
            return Ok(None);
        };
        let offset = self.report_offset()?;
        let at = |day: NaiveDate, time: NaiveTime, name: &str| {
            day.and_time(time)
                .and_local_timezone(offset)
                .single()
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("{day} is out of range"),
                })
        };
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Ok(Some(DateWindow::new(
            at(start, NaiveTime::MIN, "WINDOW_START")?,
            at(end, end_of_day, "WINDOW_END")?,
        )))
    }

    /// Search bounds for the configured window: `since` is the first day and
    /// `until` the day after the last, since the platform excludes it.
    #[must_use]
    pub fn search_bounds(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (
            self.window_start,
            self.window_end
                .and_then(|end| end.checked_add_signed(TimeDelta::days(1))),
        )
    }

    /// Offset that reported timestamps are converted to.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured offset is out of range.
    pub fn report_offset(&self) -> Result<FixedOffset, ConfigError> {
        reporting_offset(self.report_tz_offset_hours).map_err(|e| ConfigError::InvalidValue {
            name: "REPORT_TZ_OFFSET_HOURS".to_string(),
            message: e.to_string(),
        })
    }
}

fn parse_env_date(name: &str) -> Result<Option<NaiveDate>, ConfigError> {
    optional_env(name)
        .map(|val| {
            NaiveDate::parse_from_str(val.trim(), "%Y-%m-%d").map_err(|e| {
                ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("expected YYYY-MM-DD, got '{val}': {e}"),
                }
            })
        })
        .transpose()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_i32(name: &str, default: i32) -> Result<i32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.trim().parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_opt_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    optional_env(name)
        .map(|val| {
            val.parse().map_err(|e| ConfigError::ParseInt {
                name: name.to_string(),
                source: e,
            })
        })
        .transpose()
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
