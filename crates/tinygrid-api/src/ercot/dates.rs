//! Date expression parsing and API date formatting in ERCOT local time.

use chrono::{
    DateTime, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;

use super::error::{GridError, GridResult};

/// ERCOT operates on US Central time.
pub const ERCOT_TIMEZONE: Tz = chrono_tz::US::Central;

/// First operating day served by the public REST API.
pub const API_LAUNCH_DATE: &str = "2023-12-11";

/// Naive date-time layouts accepted by [`parse_date`].
const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a date expression relative to the current time.
///
/// Accepts `today`, `yesterday`, `latest` (alias `now`), `YYYY-MM-DD`,
/// naive `YYYY-MM-DD[T ]HH:MM[:SS]` (interpreted in Central time) and
/// RFC 3339 strings carrying an offset.
///
/// # Errors
///
/// Returns [`GridError::InvalidInput`] if the expression matches none of
/// the accepted forms.
pub fn parse_date(expr: &str) -> GridResult<DateTime<Tz>> {
    parse_date_at(expr, Utc::now())
}

/// Same as [`parse_date`], with the current instant supplied by the caller.
///
/// # Errors
///
/// Returns [`GridError::InvalidInput`] on unparseable input.
pub fn parse_date_at(expr: &str, now: DateTime<Utc>) -> GridResult<DateTime<Tz>> {
    let trimmed = expr.trim();
    let local_now = now.with_timezone(&ERCOT_TIMEZONE);

    match trimmed.to_ascii_lowercase().as_str() {
        "latest" | "now" => return Ok(local_now),
        "today" => return start_of_day(local_now.date_naive()),
        "yesterday" => {
            let day = local_now
                .date_naive()
                .checked_sub_days(Days::new(1))
                .ok_or_else(|| GridError::invalid("date out of range"))?;
            return start_of_day(day);
        }
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return start_of_day(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&ERCOT_TIMEZONE));
    }

    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map_or_else(
            || Err(GridError::invalid(format!("unrecognized date expression: {expr:?}"))),
            |naive| localize(&naive),
        )
}

/// Attaches Central time to a naive local timestamp.
///
/// Ambiguous fall-back times resolve to the earlier occurrence; times
/// inside the spring-forward gap move one hour ahead.
///
/// # Errors
///
/// Returns [`GridError::InvalidInput`] if no valid local instant exists.
pub fn localize(naive: &NaiveDateTime) -> GridResult<DateTime<Tz>> {
    match ERCOT_TIMEZONE.from_local_datetime(naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt),
        LocalResult::None => naive
            .checked_add_signed(Duration::hours(1))
            .and_then(|shifted| ERCOT_TIMEZONE.from_local_datetime(&shifted).earliest())
            .ok_or_else(|| GridError::invalid(format!("nonexistent local time: {naive}"))),
    }
}

/// Local midnight of `date` in Central time.
fn start_of_day(date: NaiveDate) -> GridResult<DateTime<Tz>> {
    localize(&date.and_time(NaiveTime::MIN))
}

/// Renders the API date format (`YYYY-MM-DD`, Central time).
#[must_use]
pub fn format_api_date(dt: &DateTime<Tz>) -> String {
    dt.with_timezone(&ERCOT_TIMEZONE)
        .format("%Y-%m-%d")
        .to_string()
}

/// Renders the archive listing format (`YYYY-MM-DDTHH:MM:SS`, Central time).
#[must_use]
pub fn format_api_datetime(dt: &DateTime<Tz>) -> String {
    dt.with_timezone(&ERCOT_TIMEZONE)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Half-open `[start, end)` interval in Central time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Inclusive start.
    pub start: DateTime<Tz>,
    /// Exclusive end.
    pub end: DateTime<Tz>,
}

impl DateRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidInput`] if `end` precedes `start`.
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> GridResult<Self> {
        if end < start {
            return Err(GridError::invalid(format!(
                "range end {end} precedes start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parses start/end expressions; `end` defaults to `start + 1 day`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidInput`] on an unparseable expression or
    /// an inverted range.
    pub fn parse(start: &str, end: Option<&str>) -> GridResult<Self> {
        Self::parse_at(start, end, Utc::now())
    }

    /// Same as [`DateRange::parse`], relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidInput`] on an unparseable expression or
    /// an inverted range.
    pub fn parse_at(start: &str, end: Option<&str>, now: DateTime<Utc>) -> GridResult<Self> {
        let start = parse_date_at(start, now)?;
        let end = match end {
            Some(expr) => parse_date_at(expr, now)?,
            None => start
                .checked_add_signed(Duration::days(1))
                .ok_or_else(|| GridError::invalid("date out of range"))?,
        };
        Self::new(start, end)
    }

    /// Calendar date of `start` in Central time.
    #[must_use]
    pub fn start_date(&self) -> NaiveDate {
        self.start.with_timezone(&ERCOT_TIMEZONE).date_naive()
    }

    /// Calendar date of `end` in Central time.
    #[must_use]
    pub fn end_date(&self) -> NaiveDate {
        self.end.with_timezone(&ERCOT_TIMEZONE).date_naive()
    }

    /// Whether the range covers no time at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Splits into consecutive sub-ranges of at most `days` days.
    ///
    /// The chunks are ordered, contiguous and non-overlapping; their union
    /// is exactly `self`. `days == 0` yields the range unchanged.
    #[must_use]
    pub fn chunks(&self, days: u32) -> Vec<Self> {
        if days == 0 || self.is_empty() {
            return vec![*self];
        }
        let step = Duration::days(i64::from(days));
        let mut out = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next = cursor
                .checked_add_signed(step)
                .map_or(self.end, |n| n.min(self.end));
            out.push(Self {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }

    /// Splits at `at` into `[start, at)` and `[at, end)`; either half is
    /// `None` when it would be empty.
    #[must_use]
    pub fn split_at(&self, at: DateTime<Tz>) -> (Option<Self>, Option<Self>) {
        let at = at.clamp(self.start, self.end);
        let before = (at > self.start).then_some(Self {
            start: self.start,
            end: at,
        });
        let after = (at < self.end).then_some(Self {
            start: at,
            end: self.end,
        });
        (before, after)
    }
}
