//! Column normalization, row filters and time-column derivation.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use serde_json::Value;

use super::constants::{DC_TIES, LOAD_ZONES, LocationType, TRADING_HUBS, canonical_column};
use super::dates::{DateRange, ERCOT_TIMEZONE, localize};
use crate::table::Table;

/// Columns that may hold the settlement point, most canonical first.
const LOCATION_COLUMNS: [&str; 5] = [
    "Location",
    "Settlement Point",
    "Settlement Point Name",
    "SettlementPointName",
    "SettlementPoint",
];

/// Columns that may hold the calendar date a row belongs to.
const DATE_COLUMNS: [&str; 8] = [
    "Date",
    "Delivery Date",
    "DeliveryDate",
    "Oper Day",
    "OperDay",
    "Posted Time",
    "Posted Datetime",
    "PostedDatetime",
];

/// Raw time columns replaced by `Time` / `End Time`.
const RAW_TIME_COLUMNS: [&str; 8] = [
    "Date",
    "Hour",
    "Interval",
    "Hour Ending",
    "DST",
    "Timestamp",
    "Posted Time",
    "Repeated Hour",
];

/// Columns moved to the front of finished tables.
const PRIORITY_COLUMNS: [&str; 5] = ["Time", "End Time", "Location", "Price", "Market"];

/// Naive timestamp layouts seen in SCED and forecast reports.
const NAIVE_TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Start instant and, for interval data, end instant of a row.
type Span = (DateTime<Tz>, Option<DateTime<Tz>>);

static HOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("failed to compile hour regex"));

/// Which settlement points to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFilter {
    /// Explicit settlement point names.
    pub names: Vec<String>,
    /// Location categories.
    pub types: Vec<LocationType>,
}

impl LocationFilter {
    /// Keeps everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Keeps only the named points.
    #[must_use]
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            types: Vec::new(),
        }
    }

    /// Keeps only points of the given categories.
    #[must_use]
    pub fn types(types: impl IntoIterator<Item = LocationType>) -> Self {
        Self {
            names: Vec::new(),
            types: types.into_iter().collect(),
        }
    }

    /// Whether the filter keeps every row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.types.is_empty()
    }
}

/// Renames raw report columns to their canonical names.
pub fn normalize_columns(table: &mut Table) {
    table.rename_columns(canonical_column);
}

/// Applies a [`LocationFilter`].
///
/// Tables without a location column are left untouched. A
/// `ResourceNode`-only type filter keeps everything that is neither a load
/// zone nor a trading hub.
pub fn filter_by_location(table: &mut Table, filter: &LocationFilter) {
    if filter.is_empty() || table.is_empty() {
        return;
    }
    let Some(idx) = table
        .find_column(&LOCATION_COLUMNS)
        .and_then(|col| table.column_index(col))
    else {
        return;
    };

    if !filter.names.is_empty() {
        table.retain_rows(|row| {
            row.get(idx)
                .and_then(Value::as_str)
                .is_some_and(|loc| filter.names.iter().any(|n| n == loc))
        });
    }

    let mut allowed: Vec<&str> = Vec::new();
    let mut exclude_mode = false;
    for location_type in &filter.types {
        match location_type {
            LocationType::LoadZone => allowed.extend(LOAD_ZONES),
            LocationType::TradingHub => allowed.extend(TRADING_HUBS),
            LocationType::DcTie => allowed.extend(DC_TIES),
            LocationType::ResourceNode => exclude_mode = true,
            LocationType::ElectricalBus => {}
        }
    }

    if !allowed.is_empty() {
        table.retain_rows(|row| {
            row.get(idx)
                .and_then(Value::as_str)
                .is_some_and(|loc| allowed.contains(&loc))
        });
    } else if exclude_mode {
        table.retain_rows(|row| {
            row.get(idx)
                .and_then(Value::as_str)
                .is_some_and(|loc| !LOAD_ZONES.contains(&loc) && !TRADING_HUBS.contains(&loc))
        });
    }
}

/// Keeps rows whose date falls in `[range.start_date(), last day)`.
///
/// The last day is exclusive when `range.end` is a local midnight and
/// inclusive otherwise. Rows whose date does not parse are dropped; tables
/// without a date column are left untouched.
pub fn filter_by_date(table: &mut Table, range: &DateRange) {
    let Some(idx) = table
        .find_column(&DATE_COLUMNS)
        .and_then(|col| table.column_index(col))
    else {
        return;
    };

    let first = range.start_date();
    let end_local = range.end.with_timezone(&ERCOT_TIMEZONE);
    let stop = if end_local.time() == NaiveTime::MIN {
        range.end_date()
    } else {
        range.end_date().succ_opt().unwrap_or(NaiveDate::MAX)
    };

    table.retain_rows(|row| {
        row.get(idx)
            .and_then(cell_date)
            .is_some_and(|d| d >= first && d < stop)
    });
}

/// Adds `Time` (and, for interval data, `End Time`) as RFC 3339 strings
/// in Central time.
///
/// - `Date` + `Hour` + `Interval`: 15-minute intervals.
/// - `Date` + `Hour Ending`: hourly intervals; `"01:00"` or `1` is the
///   first hour of the day and 24 the last.
/// - `Timestamp` or `Posted Time`: a point in time, no `End Time`.
///
/// During the fall-back hour a `DST` / `Repeated Hour` flag of `Y`
/// selects the second (standard time) occurrence.
pub fn add_time_columns(table: &mut Table) {
    if table.is_empty() {
        return;
    }

    let date = table.column_index("Date");
    let hour = table.column_index("Hour");
    let interval = table.column_index("Interval");
    let hour_ending = table.column_index("Hour Ending");
    let flag = table
        .column_index("DST")
        .or_else(|| table.column_index("Repeated Hour"));

    let spans: Vec<Option<Span>> =
        match (date, hour, interval, hour_ending) {
            (Some(d), Some(h), Some(i), _) => table
                .rows()
                .iter()
                .map(|row| interval_span(row, d, h, i, flag))
                .collect(),
            (Some(d), _, _, Some(he)) => table
                .rows()
                .iter()
                .map(|row| hour_ending_span(row, d, he, flag))
                .collect(),
            _ => {
                let Some(ts) = table
                    .column_index("Timestamp")
                    .or_else(|| table.column_index("Posted Time"))
                else {
                    return;
                };
                table
                    .rows()
                    .iter()
                    .map(|row| {
                        let repeated = is_repeated(row, flag);
                        row.get(ts)
                            .and_then(|v| cell_timestamp(v, repeated))
                            .map(|t| (t, None))
                    })
                    .collect()
            }
        };

    let has_end = spans.iter().flatten().any(|(_, end)| end.is_some());
    let (times, ends): (Vec<Value>, Vec<Value>) = spans
        .into_iter()
        .map(|span| match span {
            Some((start, end)) => (
                Value::String(start.to_rfc3339()),
                end.map_or(Value::Null, |e| Value::String(e.to_rfc3339())),
            ),
            None => (Value::Null, Value::Null),
        })
        .unzip();

    table.add_column("Time", times);
    if has_end {
        table.add_column("End Time", ends);
    }
}

/// Derives time columns, drops the raw ones and moves key columns first.
pub fn finalize_columns(table: &mut Table) {
    add_time_columns(table);
    table.drop_columns(&RAW_TIME_COLUMNS);
    table.reorder_front(&PRIORITY_COLUMNS);
}

/// Hour `h` (1-24), interval `i` (1-4) of a delivery date.
fn interval_span(
    row: &[Value],
    date: usize,
    hour: usize,
    interval: usize,
    flag: Option<usize>,
) -> Option<Span> {
    let day = row.get(date).and_then(cell_date)?;
    let h = row.get(hour).and_then(cell_int)?.checked_sub(1)?;
    let i = row.get(interval).and_then(cell_int)?.checked_sub(1)?;
    let naive = day
        .and_time(NaiveTime::MIN)
        .checked_add_signed(Duration::hours(i64::from(h)))?
        .checked_add_signed(Duration::minutes(i64::from(i).checked_mul(15)?))?;
    let start = localize_flagged(&naive, is_repeated(row, flag))?;
    let end = start.checked_add_signed(Duration::minutes(15))?;
    Some((start, Some(end)))
}

/// Hour-ending `he` (1-24) of a delivery or operating day.
fn hour_ending_span(
    row: &[Value],
    date: usize,
    hour_ending: usize,
    flag: Option<usize>,
) -> Option<Span> {
    let day = row.get(date).and_then(cell_date)?;
    let he = row.get(hour_ending).and_then(cell_hour)?.checked_sub(1)?;
    let naive = day
        .and_time(NaiveTime::MIN)
        .checked_add_signed(Duration::hours(i64::from(he)))?;
    let start = localize_flagged(&naive, is_repeated(row, flag))?;
    let end = start.checked_add_signed(Duration::hours(1))?;
    Some((start, Some(end)))
}

/// Attaches Central time, picking the later instant of an ambiguous hour
/// when `repeated` is set.
fn localize_flagged(naive: &NaiveDateTime, repeated: bool) -> Option<DateTime<Tz>> {
    match ERCOT_TIMEZONE.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(early, late) => Some(if repeated { late } else { early }),
        LocalResult::None => localize(naive).ok(),
    }
}

fn is_repeated(row: &[Value], flag: Option<usize>) -> bool {
    flag.and_then(|i| row.get(i)).is_some_and(|v| match v {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim(), "Y" | "y" | "true" | "True" | "TRUE"),
        _ => false,
    })
}

/// Calendar date from `YYYY-MM-DD...` or `MM/DD/YYYY...`.
fn cell_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    let head = text.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%m/%d/%Y"))
        .ok()
}

fn cell_int(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Hour from `"01:00"`, `"1"` or `1`.
fn cell_hour(value: &Value) -> Option<u32> {
    match value {
        Value::String(s) => HOUR_RE
            .captures(s)?
            .get(1)?
            .as_str()
            .parse()
            .ok(),
        other => cell_int(other),
    }
}

/// Instant from an RFC 3339 string or a naive Central timestamp.
fn cell_timestamp(value: &Value, repeated: bool) -> Option<DateTime<Tz>> {
    let text = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&ERCOT_TIMEZONE));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| localize_flagged(&naive, repeated))
}
