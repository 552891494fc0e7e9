//! Time handling — granularities, period keys, time ranges and time literals.
//!
//! Temporal dimensions are rendered as period keys whose lexical order matches
//! chronological order (`2024-01-05`, `2024-01`, ...), so they group, sort and
//! compare like ordinary strings.

use crate::error::{MelvinError, MelvinResult};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;

/// Bucket size of a temporal dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            "week" => Some(Granularity::Week),
            "month" => Some(Granularity::Month),
            "year" => Some(Granularity::Year),
            _ => None,
        }
    }

    /// True when every `self` bucket lies inside exactly one `coarser` bucket.
    pub fn nests_in(&self, coarser: Granularity) -> bool {
        use Granularity::*;
        match (self, coarser) {
            (Hour, Day | Week | Month | Year) => true,
            (Day, Week | Month | Year) => true,
            (Month, Year) => true,
            _ => false,
        }
    }

    /// Renders the period containing `ts_ms`.
    pub fn period_key(&self, ts_ms: i64) -> String {
        let dt = datetime_from_millis(ts_ms);
        match self {
            Granularity::Hour => dt.format("%Y-%m-%dT%H").to_string(),
            Granularity::Day => dt.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = dt.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => dt.format("%Y-%m").to_string(),
            Granularity::Year => dt.format("%Y").to_string(),
        }
    }

    /// Start of the period named by `key`, in epoch milliseconds.
    pub fn period_start(&self, key: &str) -> Option<i64> {
        let date = match self {
            Granularity::Hour => {
                let dt = NaiveDateTime::parse_from_str(&format!("{key}:00:00"), "%Y-%m-%dT%H:%M:%S")
                    .ok()?;
                return Some(dt.and_utc().timestamp_millis());
            }
            Granularity::Day => NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()?,
            Granularity::Week => {
                let (year, week) = key.split_once("-W")?;
                NaiveDate::from_isoywd_opt(year.parse().ok()?, week.parse().ok()?, chrono::Weekday::Mon)?
            }
            Granularity::Month => NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d").ok()?,
            Granularity::Year => NaiveDate::from_ymd_opt(key.parse().ok()?, 1, 1)?,
        };
        Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
    }

    /// Length of the period named by `key` in milliseconds.
    pub fn period_length(&self, key: &str) -> Option<i64> {
        let start = self.period_start(key)?;
        let length = match self {
            Granularity::Hour => MS_PER_HOUR,
            Granularity::Day => MS_PER_DAY,
            Granularity::Week => MS_PER_WEEK,
            Granularity::Month | Granularity::Year => {
                let begin = datetime_from_millis(start).date_naive();
                let next = if *self == Granularity::Month {
                    begin.checked_add_months(chrono::Months::new(1))?
                } else {
                    NaiveDate::from_ymd_opt(begin.year() + 1, 1, 1)?
                };
                (next - begin).num_milliseconds()
            }
        };
        Some(length)
    }

    /// Re-renders a finer period key at this (coarser) granularity.
    pub fn coarsen(&self, from: Granularity, key: &str) -> Option<String> {
        from.period_start(key).map(|start| self.period_key(start))
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time range `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn before(end: i64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts < e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Narrows this range to its overlap with `other`.
    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        TimeRange { start, end }
    }
}

/// Unit a `rate per_X` transform converts elapsed time into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl RateUnit {
    pub fn millis(&self) -> i64 {
        match self {
            RateUnit::Second => MS_PER_SECOND,
            RateUnit::Minute => MS_PER_MINUTE,
            RateUnit::Hour => MS_PER_HOUR,
            RateUnit::Day => MS_PER_DAY,
            RateUnit::Week => MS_PER_WEEK,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateUnit::Second => "second",
            RateUnit::Minute => "minute",
            RateUnit::Hour => "hour",
            RateUnit::Day => "day",
            RateUnit::Week => "week",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "second" | "sec" | "s" => Some(RateUnit::Second),
            "minute" | "min" | "m" => Some(RateUnit::Minute),
            "hour" | "h" => Some(RateUnit::Hour),
            "day" | "d" => Some(RateUnit::Day),
            "week" | "w" => Some(RateUnit::Week),
            _ => None,
        }
    }
}

/// A span written as `<n><unit>` (`7d`, `12h`, `30m`, `45s`, `2w`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub amount: i64,
    pub unit: char,
}

impl Span {
    pub fn parse(s: &str) -> Option<Self> {
        let unit = s.chars().last()?;
        if !matches!(unit, 's' | 'm' | 'h' | 'd' | 'w') {
            return None;
        }
        let digits = &s[..s.len() - 1];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Span {
            amount: digits.parse().ok()?,
            unit,
        })
    }

    pub fn millis(&self) -> i64 {
        let per = match self.unit {
            's' => MS_PER_SECOND,
            'm' => MS_PER_MINUTE,
            'h' => MS_PER_HOUR,
            'd' => MS_PER_DAY,
            _ => MS_PER_WEEK,
        };
        self.amount.saturating_mul(per)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit)
    }
}

/// Resolves a time literal against `now`.
///
/// Accepts `now`, relative spans (`-7d`), dates (`2024-01-01`), date-times
/// (`2024-01-01T10:00:00`, optionally with `Z`/offset) and RFC 3339.
pub fn parse_time_literal(text: &str, now: DateTime<Utc>) -> Option<i64> {
    if text == "now" {
        return Some(now.timestamp_millis());
    }
    if let Some(rest) = text.strip_prefix('-') {
        let span = Span::parse(rest)?;
        // out of chrono's range is not a time
        let back = TimeDelta::try_milliseconds(span.millis())?;
        return now.checked_sub_signed(back).map(|t| t.timestamp_millis());
    }
    parse_absolute_time(text)
}

/// True if `text` is shaped like a time literal (used to pick a literal's type).
pub fn looks_like_time(text: &str) -> bool {
    text == "now"
        || text.strip_prefix('-').is_some_and(|r| Span::parse(r).is_some())
        || parse_absolute_time(text).is_some()
}

/// Parses absolute timestamps; no relative forms.
pub fn parse_absolute_time(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

pub fn datetime_from_millis(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses a granularity name, failing with a schema-shaped error.
pub(crate) fn granularity_from_str(domain: &str, s: &str) -> MelvinResult<Granularity> {
    Granularity::parse(s).ok_or_else(|| MelvinError::InvalidSchema {
        domain: domain.to_string(),
        reason: format!("unknown granularity '{s}'"),
    })
}
