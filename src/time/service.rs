//! Network time synchronization
//!
//! The time service answers a strftime-formatted string for the caller's
//! timezone (or the timezone guessed from its IP address). It is rate-limited
//! per account, so every request carries a username/key pair.

use super::clock::Clock;
use super::fetch::{FetchError, HttpFetch, HttpResponse, ScopedResponse};
use super::Timestamp;
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Default time service endpoint
pub const DEFAULT_TIME_SERVICE_URL: &str = "https://io.adafruit.com/api/v2";

/// Reply format: `%Y-%m-%d %H:%M:%S.%L %j %u %z %Z`
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S.%L %j %u %z %Z";

const KEY_PARAM: &str = "x-aio-key";

/// Clock synchronization errors
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("Time service requires a username and key")]
    MissingCredentials,
    #[error("Invalid time service URL: {0}")]
    InvalidUrl(String),
    #[error("Time request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Malformed time response: {0}")]
    MalformedResponse(String),
}

/// Account used to rate-limit time requests
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TimeServiceCredentials {
    pub username: Option<String>,
    pub key: Option<String>,
}

impl TimeServiceCredentials {
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            key: Some(key.into()),
        }
    }

    /// The username/key pair, if both are present and non-empty
    fn pair(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let key = self.key.as_deref().filter(|k| !k.is_empty())?;
        Some((username, key))
    }
}

impl std::fmt::Debug for TimeServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeServiceCredentials")
            .field("username", &self.username)
            .field("key", &self.key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Parsed reply of the time service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTime {
    /// Local calendar time as reported
    pub local: NaiveDateTime,
    /// UTC offset of the local time
    pub offset: FixedOffset,
    /// Day of the year, 1..=366
    pub year_day: u32,
    /// ISO day of the week, Monday = 1
    pub week_day: u32,
    /// Seconds since the Unix epoch
    pub timestamp: Timestamp,
}

/// Fetches network time and records it in a [`Clock`]
pub struct TimeSource<F: HttpFetch> {
    fetch: F,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl<F: HttpFetch> TimeSource<F> {
    pub fn new(fetch: F, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetch,
            clock,
            base_url: DEFAULT_TIME_SERVICE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Fetch the current time and record it in the clock
    ///
    /// The clock is left untouched when any step fails.
    pub async fn sync_clock(
        &self,
        credentials: &TimeServiceCredentials,
        timezone: Option<&str>,
    ) -> Result<Timestamp, TimeError> {
        let (username, key) = credentials.pair().ok_or(TimeError::MissingCredentials)?;
        let url = build_request_url(&self.base_url, username, key, timezone)?;

        match timezone {
            Some(tz) => info!(timezone = tz, "Requesting network time for timezone"),
            None => info!("Requesting network time from IP address"),
        }
        debug!(url = %redact_url(&url), "Time request");

        let response = ScopedResponse::new(self.fetch.get(url.as_str()).await?);
        debug!(reply = response.text(), "Time reply");
        let parsed = parse_time_response(response.text())?;
        drop(response);

        self.clock.set(parsed.timestamp);
        info!(
            timestamp = parsed.timestamp,
            local = %parsed.local,
            offset = %parsed.offset,
            "Clock synchronized"
        );
        Ok(parsed.timestamp)
    }
}

/// Build the time service request URL
pub fn build_request_url(
    base_url: &str,
    username: &str,
    key: &str,
    timezone: Option<&str>,
) -> Result<Url, TimeError> {
    let mut url = Url::parse(base_url).map_err(|e| TimeError::InvalidUrl(e.to_string()))?;

    url.path_segments_mut()
        .map_err(|_| TimeError::InvalidUrl(format!("{base_url} cannot be a base URL")))?
        .pop_if_empty()
        .extend([username, "integrations", "time", "strftime"]);

    {
        let mut query = url.query_pairs_mut();
        query.append_pair(KEY_PARAM, key);
        if let Some(tz) = timezone {
            query.append_pair("tz", tz);
        }
        query.append_pair("fmt", TIME_FORMAT);
    }

    Ok(url)
}

/// Render a request URL with the service key masked
pub fn redact_url(url: &Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if name == KEY_PARAM {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Parse `<date> <time> <year_day> <week_day> [<utc offset> [<zone>]]`
pub fn parse_time_response(text: &str) -> Result<NetworkTime, TimeError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(malformed(format!(
            "expected at least 4 fields, got {}",
            fields.len()
        )));
    }

    let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d")
        .map_err(|e| malformed(format!("invalid date '{}': {e}", fields[0])))?;

    let whole_seconds = fields[1].split('.').next().unwrap_or(fields[1]);
    let time = NaiveTime::parse_from_str(whole_seconds, "%H:%M:%S")
        .map_err(|e| malformed(format!("invalid time '{}': {e}", fields[1])))?;

    let year_day: u32 = fields[2]
        .parse()
        .ok()
        .filter(|d| (1..=366).contains(d))
        .ok_or_else(|| malformed(format!("invalid year day '{}'", fields[2])))?;

    let week_day: u32 = fields[3]
        .parse()
        .ok()
        .filter(|d| (1..=7).contains(d))
        .ok_or_else(|| malformed(format!("invalid week day '{}'", fields[3])))?;

    if date.ordinal() != year_day {
        return Err(malformed(format!(
            "year day {year_day} does not match date {date}"
        )));
    }
    if date.weekday().number_from_monday() != week_day {
        return Err(malformed(format!(
            "week day {week_day} does not match date {date}"
        )));
    }

    let offset = match fields.get(4) {
        Some(raw) => parse_utc_offset(raw)?,
        None => FixedOffset::east_opt(0).ok_or_else(|| malformed("invalid UTC offset"))?,
    };

    let local = NaiveDateTime::new(date, time);
    let timestamp = offset
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| malformed(format!("local time {local} is ambiguous")))?
        .timestamp();

    Ok(NetworkTime {
        local,
        offset,
        year_day,
        week_day,
        timestamp,
    })
}

/// Parse `+HHMM`, `-HHMM`, `+HH:MM` or `-HH:MM`
fn parse_utc_offset(raw: &str) -> Result<FixedOffset, TimeError> {
    let invalid = || malformed(format!("invalid UTC offset '{raw}'"));

    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn malformed(message: impl Into<String>) -> TimeError {
    TimeError::MalformedResponse(message.into())
}
