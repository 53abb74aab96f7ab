//! Live/archive routing by data age.
//!
//! The live REST API only serves roughly the last 90 days; older data
//! comes from the document archive. A range straddling the cutover is
//! split at a Central-time midnight and both halves are fetched
//! concurrently.

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use chrono_tz::Tz;

use super::api::LocalErcotApi;
use super::archive::ArchiveFailure;
use super::dates::{DateRange, ERCOT_TIMEZONE, localize};
use super::error::GridResult;
use super::report::Report;
use super::transforms::normalize_columns;
use crate::table::Table;

/// Where a request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Entirely from the live REST API.
    Live(DateRange),
    /// Entirely from the archive.
    Archive(DateRange),
    /// Older part from the archive, newer part live.
    Split {
        /// `[start, cutoff)`.
        archive: DateRange,
        /// `[cutoff, end)`.
        live: DateRange,
    },
}

impl Route {
    /// Whether any part is served from the archive.
    #[must_use]
    pub const fn uses_archive(&self) -> bool {
        !matches!(self, Self::Live(_))
    }
}

/// Decides between live and archive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Router {
    threshold: Duration,
}

impl Router {
    /// Router with a cutover `days` old.
    #[must_use]
    pub fn new(days: u32) -> Self {
        Self {
            threshold: Duration::days(i64::from(days)),
        }
    }

    /// Cutover age.
    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Plans `range` for `report` as seen at `now`.
    ///
    /// A range whose start is at most `threshold` old is live. Otherwise
    /// the cutoff `now - threshold` is rounded up to the next Central
    /// midnight; a range ending at or before it is archive, anything else
    /// is split there. Archive-only reports always route to the archive.
    #[must_use]
    pub fn plan(&self, report: Report, range: &DateRange, now: DateTime<Utc>) -> Route {
        if !report.live_available() {
            return Route::Archive(*range);
        }

        let now = now.with_timezone(&ERCOT_TIMEZONE);
        if now.signed_duration_since(range.start) <= self.threshold {
            return Route::Live(*range);
        }

        let Some(cutoff) = now.checked_sub_signed(self.threshold).map(ceil_midnight) else {
            return Route::Archive(*range);
        };
        match range.split_at(cutoff) {
            (Some(archive), Some(live)) => Route::Split { archive, live },
            (None, Some(live)) => Route::Live(live),
            _ => Route::Archive(*range),
        }
    }
}

/// `dt` if it is a Central midnight, else the following one.
fn ceil_midnight(dt: DateTime<Tz>) -> DateTime<Tz> {
    let local = dt.with_timezone(&ERCOT_TIMEZONE);
    let midnight = local.date_naive().and_time(NaiveTime::MIN);
    if local.naive_local() == midnight {
        return local;
    }
    midnight
        .checked_add_days(Days::new(1))
        .and_then(|next| localize(&next).ok())
        .unwrap_or(local)
}

/// Rows for a routed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Shaped rows in chronological order.
    pub table: Table,
    /// How the range was served.
    pub route: Route,
    /// Parts of the archive fetch that produced no rows.
    pub failures: Vec<ArchiveFailure>,
}

impl Dataset {
    /// An empty dataset for `route`.
    #[must_use]
    pub fn empty(route: Route) -> Self {
        Self {
            table: Table::default(),
            route,
            failures: Vec::new(),
        }
    }

    /// Whether some requested data could not be fetched.
    ///
    /// A partial dataset may still be empty; an empty dataset that is not
    /// partial means the range simply holds no data.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Fetches `report` for `range` along the route planned at `now`.
///
/// Every fetched table has its columns normalized and is then passed to
/// `shape`. Both halves of a split are in flight at once and are shaped
/// separately; live rows whose [`Report::natural_key`] already appears in
/// the archive half are dropped before the halves are merged in time
/// order. Rows are never de-duplicated within one half. When the archive
/// half of a split fails outright, the live rows are kept and the archive
/// range is reported as a failure.
///
/// # Errors
///
/// - Any live fetch error.
/// - An archive error when the whole range is archive.
#[allow(clippy::future_not_send)]
pub async fn fetch_routed(
    api: &impl LocalErcotApi,
    router: &Router,
    report: Report,
    range: &DateRange,
    now: DateTime<Utc>,
    shape: impl Fn(&mut Table),
) -> GridResult<Dataset> {
    let route = router.plan(report, range, now);
    tracing::debug!(%report, ?route, "Planned route");

    let prepare = |mut table: Table| {
        normalize_columns(&mut table);
        shape(&mut table);
        table
    };

    match route {
        Route::Live(live) => {
            let table = api.fetch_live(report, &live).await?;
            Ok(Dataset {
                table: prepare(table),
                route,
                failures: Vec::new(),
            })
        }
        Route::Archive(archive) => {
            let fetch = api.fetch_archive(report, &archive).await?;
            Ok(Dataset {
                table: prepare(fetch.table),
                route,
                failures: fetch.failures,
            })
        }
        Route::Split { archive, live } => {
            let (archived, recent) = futures::join!(
                api.fetch_archive(report, &archive),
                api.fetch_live(report, &live)
            );
            let mut recent = prepare(recent?);

            let (older, failures) = match archived {
                Ok(fetch) => (prepare(fetch.table), fetch.failures),
                Err(err) => {
                    tracing::warn!(%report, error = %err, "Archive half of split failed");
                    (
                        Table::default(),
                        vec![ArchiveFailure::Chunk {
                            range: archive,
                            error: err.to_string(),
                        }],
                    )
                }
            };

            recent.retain_unseen(&older, report.natural_key());
            let mut table = Table::concat([older, recent]);
            table.sort_by_time("Time");
            Ok(Dataset {
                table,
                route,
                failures,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use std::sync::Mutex;

    use chrono::TimeZone;
    use serde_json::{Value, json};

    use super::*;
    use crate::ercot::archive::ArchiveFetch;
    use crate::ercot::error::GridError;

    /// In-memory data source recording which transport served what.
    #[derive(Debug, Default)]
    pub(crate) struct MockApi {
        pub(crate) live: Table,
        pub(crate) archive: Table,
        pub(crate) archive_error: bool,
        pub(crate) calls: Mutex<Vec<(&'static str, DateRange)>>,
    }

    impl LocalErcotApi for MockApi {
        async fn fetch_live(&self, _report: Report, range: &DateRange) -> GridResult<Table> {
            self.calls.lock().unwrap().push(("live", *range));
            Ok(self.live.clone())
        }

        async fn fetch_archive(
            &self,
            _report: Report,
            range: &DateRange,
        ) -> GridResult<ArchiveFetch> {
            self.calls.lock().unwrap().push(("archive", *range));
            if self.archive_error {
                return Err(GridError::invalid("archive down"));
            }
            Ok(ArchiveFetch {
                table: self.archive.clone(),
                failures: Vec::new(),
                documents: 1,
            })
        }
    }

    /// 2024-06-15 12:00 CDT.
    pub(crate) fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 17, 0, 0).unwrap()
    }

    fn days_ago(days: u64) -> DateTime<Tz> {
        let now = fixed_now().with_timezone(&ERCOT_TIMEZONE);
        let day = now.date_naive().checked_sub_days(Days::new(days)).unwrap();
        localize(&day.and_time(NaiveTime::MIN)).unwrap()
    }

    fn one_row(location: &str) -> Table {
        Table::from_rows(
            vec![String::from("SettlementPoint")],
            vec![vec![Value::String(String::from(location))]],
        )
    }

    #[test]
    fn test_two_years_ago_is_archive_only() {
        // Arrange
        let router = Router::new(90);
        let range = DateRange::new(days_ago(730), days_ago(729)).unwrap();

        // Act
        let route = router.plan(Report::SppRealTime, &range, fixed_now());

        // Assert
        assert_eq!(route, Route::Archive(range));
    }

    #[test]
    fn test_yesterday_is_live_only() {
        // Arrange
        let router = Router::new(90);
        let range = DateRange::new(days_ago(1), days_ago(0)).unwrap();

        // Act
        let route = router.plan(Report::SppRealTime, &range, fixed_now());

        // Assert
        assert_eq!(route, Route::Live(range));
    }

    #[test]
    fn test_start_exactly_at_threshold_is_live() {
        // Arrange
        let router = Router::new(90);
        let start = fixed_now()
            .with_timezone(&ERCOT_TIMEZONE)
            .checked_sub_signed(Duration::days(90))
            .unwrap();
        let range = DateRange::new(start, days_ago(0)).unwrap();

        // Act
        let route = router.plan(Report::SppDayAhead, &range, fixed_now());

        // Assert
        assert!(matches!(route, Route::Live(_)));
    }

    #[test]
    fn test_straddling_range_splits_at_midnight() {
        // Arrange
        let router = Router::new(90);
        let range = DateRange::new(days_ago(120), days_ago(10)).unwrap();

        // Act
        let route = router.plan(Report::SppRealTime, &range, fixed_now());

        // Assert: cutoff 2024-03-17 12:00 rounds up to 2024-03-18 00:00
        let Route::Split { archive, live } = route else {
            panic!("expected split, got {route:?}");
        };
        assert_eq!(archive.start, range.start);
        assert_eq!(archive.end, live.start);
        assert_eq!(live.end, range.end);
        assert_eq!(live.start, days_ago(89));
    }

    #[test]
    fn test_old_range_ending_before_cutoff_is_archive() {
        // Arrange
        let router = Router::new(90);
        let range = DateRange::new(days_ago(200), days_ago(100)).unwrap();

        // Act
        let route = router.plan(Report::LmpDayAhead, &range, fixed_now());

        // Assert
        assert_eq!(route, Route::Archive(range));
    }

    #[test]
    fn test_archive_only_report_ignores_age() {
        // Arrange
        let router = Router::new(90);
        let range = DateRange::new(days_ago(1), days_ago(0)).unwrap();

        // Act
        let route = router.plan(Report::DcTieFlows, &range, fixed_now());

        // Assert
        assert!(route.uses_archive());
    }

    #[tokio::test]
    async fn test_fetch_routed_split_concatenates_archive_first() {
        // Arrange
        let api = MockApi {
            live: one_row("LZ_WEST"),
            archive: one_row("HB_NORTH"),
            ..MockApi::default()
        };
        let range = DateRange::new(days_ago(120), days_ago(10)).unwrap();

        // Act
        let dataset = fetch_routed(&api, &Router::new(90), Report::SppRealTime, &range, fixed_now(), |_| {})
            .await
            .unwrap();

        // Assert
        assert_eq!(dataset.table.columns(), ["Location"]);
        let locations: Vec<_> = dataset.table.column("Location").unwrap().collect();
        assert_eq!(locations, [&json!("HB_NORTH"), &json!("LZ_WEST")]);
        assert_eq!(api.calls.lock().unwrap().len(), 2);
        assert!(!dataset.is_partial());
    }

    #[tokio::test]
    async fn test_fetch_routed_keeps_live_half_when_archive_fails() {
        // Arrange
        let api = MockApi {
            live: one_row("LZ_WEST"),
            archive_error: true,
            ..MockApi::default()
        };
        let range = DateRange::new(days_ago(120), days_ago(10)).unwrap();

        // Act
        let dataset = fetch_routed(&api, &Router::new(90), Report::SppRealTime, &range, fixed_now(), |_| {})
            .await
            .unwrap();

        // Assert
        assert_eq!(dataset.table.len(), 1);
        assert!(dataset.is_partial());
        assert!(matches!(dataset.failures[0], ArchiveFailure::Chunk { .. }));
    }

    #[tokio::test]
    async fn test_fetch_routed_archive_error_propagates() {
        // Arrange
        let api = MockApi {
            archive_error: true,
            ..MockApi::default()
        };
        let range = DateRange::new(days_ago(730), days_ago(729)).unwrap();

        // Act
        let result =
            fetch_routed(&api, &Router::new(90), Report::SppRealTime, &range, fixed_now(), |_| {})
                .await;

        // Assert
        assert!(result.is_err());
    }
}
