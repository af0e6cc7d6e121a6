//! Parsing of server-declared rate-limit headers.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RETRY_AFTER: &[&str] = &["retry-after", "x-retry-after"];
const REMAINING: &[&str] = &[
    "x-ratelimit-remaining",
    "x-rate-limit-remaining",
    "ratelimit-remaining",
];
const LIMIT: &[&str] = &["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"];
const RESET: &[&str] = &["x-ratelimit-reset", "x-rate-limit-reset", "ratelimit-reset"];

/// What the server told us about its limits, normalized to durations
/// from now.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ServerHints {
    pub retry_after: Option<Duration>,
    pub limit: Option<f64>,
    pub remaining: Option<f64>,
    pub reset_after: Option<Duration>,
}

impl ServerHints {
    pub fn is_empty(&self) -> bool {
        self.retry_after.is_none()
            && self.limit.is_none()
            && self.remaining.is_none()
            && self.reset_after.is_none()
    }

    /// The wait the server asked for, from whichever header carried it.
    pub fn wait_hint(&self) -> Option<Duration> {
        self.retry_after.or(self.reset_after)
    }
}

/// Extracts rate-limit hints from response headers. Header names are
/// expected lowercase (the engine normalizes them on receipt); all the
/// common spellings are recognized.
pub fn parse_hints(headers: &BTreeMap<String, String>) -> ServerHints {
    ServerHints {
        retry_after: first_value(headers, RETRY_AFTER).and_then(parse_seconds),
        limit: first_value(headers, LIMIT).and_then(|v| v.trim().parse::<f64>().ok()),
        remaining: first_value(headers, REMAINING).and_then(|v| v.trim().parse::<f64>().ok()),
        reset_after: first_value(headers, RESET).and_then(parse_reset),
    }
}

fn first_value<'a>(headers: &'a BTreeMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).map(String::as_str))
}

/// `Retry-After` carries delta-seconds (the HTTP-date form is rare from
/// rate limiters and is ignored here).
fn parse_seconds(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| *s >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Reset headers carry either delta-seconds or an absolute epoch stamp;
/// anything past 10^9 is treated as an epoch.
fn parse_reset(value: &str) -> Option<Duration> {
    let raw = value.trim().parse::<f64>().ok().filter(|s| *s >= 0.0)?;
    if raw < 1_000_000_000.0 {
        return Some(Duration::from_secs_f64(raw));
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    let delta = raw - now;
    if delta <= 0.0 {
        Some(Duration::ZERO)
    } else {
        Some(Duration::from_secs_f64(delta))
    }
}
