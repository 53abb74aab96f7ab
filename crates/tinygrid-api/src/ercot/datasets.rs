//! Unified accessors: one call per dataset, routed live or archive.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde_json::Value;
use tracing::instrument;

use super::client::ErcotClient;
use super::constants::{LocationType, Market};
use super::dates::DateRange;
use super::error::{GridError, GridResult};
use super::report::Report;
use super::routing::{Dataset, fetch_routed};
use super::transforms::{LocationFilter, filter_by_date, filter_by_location, finalize_columns};
use crate::table::Table;

/// Grouping for actual system load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadGrouping {
    /// Weather zones (Coast, East, Far West, ...).
    #[default]
    WeatherZone,
    /// Forecast zones (North, South, West, Houston).
    ForecastZone,
}

impl FromStr for LoadGrouping {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "weather_zone" | "weather" | "wzn" => Ok(Self::WeatherZone),
            "forecast_zone" | "forecast" | "fzn" => Ok(Self::ForecastZone),
            _ => Err(GridError::invalid(format!("unknown load grouping: {s:?}"))),
        }
    }
}

/// Renewable forecast resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resolution {
    /// Hourly averages with forecasts.
    #[default]
    Hourly,
    /// 5-minute actuals.
    FiveMinute,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hourly => "hourly",
            Self::FiveMinute => "5min",
        })
    }
}

impl FromStr for Resolution {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "5min" | "5-min" | "5_min" => Ok(Self::FiveMinute),
            _ => Err(GridError::invalid(format!(
                "invalid resolution: {s:?}; use 'hourly' or '5min'"
            ))),
        }
    }
}

/// Options for wind and solar forecasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForecastOptions {
    /// Break down by geographic region.
    pub by_region: bool,
    /// Data resolution.
    pub resolution: Resolution,
}

impl ForecastOptions {
    const fn wind_report(self) -> Report {
        match (self.resolution, self.by_region) {
            (Resolution::Hourly, false) => Report::WindHourly,
            (Resolution::Hourly, true) => Report::WindHourlyRegion,
            (Resolution::FiveMinute, false) => Report::Wind5Min,
            (Resolution::FiveMinute, true) => Report::Wind5MinRegion,
        }
    }

    const fn solar_report(self) -> Report {
        match (self.resolution, self.by_region) {
            (Resolution::Hourly, false) => Report::SolarHourly,
            (Resolution::Hourly, true) => Report::SolarHourlyRegion,
            (Resolution::FiveMinute, false) => Report::Solar5Min,
            (Resolution::FiveMinute, true) => Report::Solar5MinRegion,
        }
    }
}

/// Post-fetch pipeline applied to every fetched table.
///
/// Date filter, `Market` column, location filter, derived time columns
/// and chronological sort. Rows are not de-duplicated here; only the
/// boundary of a split range is, in [`fetch_routed`].
pub fn shape(table: &mut Table, range: &DateRange, market: Option<Market>, filter: &LocationFilter) {
    filter_by_date(table, range);
    if let Some(market) = market {
        table.fill_column("Market", &Value::String(String::from(market.as_str())));
    }
    filter_by_location(table, filter);
    finalize_columns(table);
    table.sort_by_time("Time");
}

impl ErcotClient {
    /// Fetches any report through routing and the shaping pipeline.
    ///
    /// With `soft_errors` enabled, failures are logged and an empty
    /// dataset is returned instead.
    ///
    /// # Errors
    ///
    /// Returns the routed fetch error unless `soft_errors` is set.
    #[instrument(skip_all, fields(report = %report))]
    pub async fn get_report(
        &self,
        report: Report,
        range: &DateRange,
        market: Option<Market>,
        filter: &LocationFilter,
    ) -> GridResult<Dataset> {
        let now = Utc::now();
        let shaped = |table: &mut Table| shape(table, range, market, filter);
        match fetch_routed(self, &self.router, report, range, now, shaped).await {
            Ok(dataset) => {
                if dataset.is_partial() {
                    for failure in &dataset.failures {
                        tracing::warn!(%report, %failure, "Archive data incomplete");
                    }
                }
                tracing::info!(
                    %report,
                    rows = dataset.table.len(),
                    failures = dataset.failures.len(),
                    "Dataset ready"
                );
                Ok(dataset)
            }
            Err(err) if self.soft_errors => {
                tracing::warn!(%report, error = %err, "Request failed, returning empty dataset");
                Ok(Dataset::empty(self.router.plan(report, range, now)))
            }
            Err(err) => Err(err),
        }
    }

    /// Settlement point prices.
    ///
    /// # Errors
    ///
    /// - [`GridError::InvalidInput`] for the SCED market.
    /// - Fetch errors, unless `soft_errors` is set.
    pub async fn get_spp(
        &self,
        range: &DateRange,
        market: Market,
        filter: &LocationFilter,
    ) -> GridResult<Dataset> {
        let report = match market {
            Market::RealTime15Min => Report::SppRealTime,
            Market::DayAheadHourly => Report::SppDayAhead,
            Market::RealTimeSced => {
                return Err(GridError::invalid(
                    "settlement point prices are REAL_TIME_15_MIN or DAY_AHEAD_HOURLY",
                ));
            }
        };
        self.get_report(report, range, Some(market), filter).await
    }

    /// Locational marginal prices.
    ///
    /// SCED prices come by settlement point or by electrical bus; day-ahead
    /// prices are by settlement point only.
    ///
    /// # Errors
    ///
    /// - [`GridError::InvalidInput`] for the 15-minute market.
    /// - Fetch errors, unless `soft_errors` is set.
    pub async fn get_lmp(
        &self,
        range: &DateRange,
        market: Market,
        location_type: LocationType,
    ) -> GridResult<Dataset> {
        let report = match (market, location_type) {
            (Market::RealTimeSced, LocationType::ElectricalBus) => Report::LmpElectricalBus,
            (Market::RealTimeSced, _) => Report::LmpNodeZoneHub,
            (Market::DayAheadHourly, _) => Report::LmpDayAhead,
            (Market::RealTime15Min, _) => {
                return Err(GridError::invalid(
                    "LMP is REAL_TIME_SCED or DAY_AHEAD_HOURLY",
                ));
            }
        };
        self.get_report(report, range, Some(market), &LocationFilter::all())
            .await
    }

    /// Day-ahead ancillary service clearing prices.
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_as_prices(&self, range: &DateRange) -> GridResult<Dataset> {
        self.get_report(Report::AsPrices, range, None, &LocationFilter::all())
            .await
    }

    /// Day-ahead ancillary service plan.
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_as_plan(&self, range: &DateRange) -> GridResult<Dataset> {
        self.get_report(Report::AsPlan, range, None, &LocationFilter::all())
            .await
    }

    /// Transmission constraint shadow prices.
    ///
    /// # Errors
    ///
    /// - [`GridError::InvalidInput`] for the 15-minute market.
    /// - Fetch errors, unless `soft_errors` is set.
    pub async fn get_shadow_prices(&self, range: &DateRange, market: Market) -> GridResult<Dataset> {
        let report = match market {
            Market::RealTimeSced => Report::ShadowPricesSced,
            Market::DayAheadHourly => Report::ShadowPricesDayAhead,
            Market::RealTime15Min => {
                return Err(GridError::invalid(
                    "shadow prices are REAL_TIME_SCED or DAY_AHEAD_HOURLY",
                ));
            }
        };
        self.get_report(report, range, Some(market), &LocationFilter::all())
            .await
    }

    /// Actual system load.
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_load(&self, range: &DateRange, grouping: LoadGrouping) -> GridResult<Dataset> {
        let report = match grouping {
            LoadGrouping::WeatherZone => Report::LoadWeatherZone,
            LoadGrouping::ForecastZone => Report::LoadForecastZone,
        };
        self.get_report(report, range, None, &LocationFilter::all())
            .await
    }

    /// Wind power actuals and forecasts.
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_wind_forecast(
        &self,
        range: &DateRange,
        options: ForecastOptions,
    ) -> GridResult<Dataset> {
        self.get_report(options.wind_report(), range, None, &LocationFilter::all())
            .await
    }

    /// Solar power actuals and forecasts.
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_solar_forecast(
        &self,
        range: &DateRange,
        options: ForecastOptions,
    ) -> GridResult<Dataset> {
        self.get_report(options.solar_report(), range, None, &LocationFilter::all())
            .await
    }

    /// DC tie flows (archive only).
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_dc_tie_flows(&self, range: &DateRange) -> GridResult<Dataset> {
        self.get_report(Report::DcTieFlows, range, None, &LocationFilter::all())
            .await
    }

    /// Total ERCOT generation (archive only).
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_total_generation(&self, range: &DateRange) -> GridResult<Dataset> {
        self.get_report(Report::TotalGeneration, range, None, &LocationFilter::all())
            .await
    }

    /// System-wide SCED actuals (archive only).
    ///
    /// # Errors
    ///
    /// Fetch errors, unless `soft_errors` is set.
    pub async fn get_system_wide_actuals(&self, range: &DateRange) -> GridResult<Dataset> {
        self.get_report(Report::SystemWideActuals, range, None, &LocationFilter::all())
            .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use chrono::{Days, NaiveDate, NaiveTime};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::ercot::auth::tests::mount_token;
    use crate::ercot::client::tests::{test_builder, test_client};
    use crate::ercot::dates::{ERCOT_TIMEZONE, localize};
    use crate::ercot::routing::tests::{MockApi, fixed_now};
    use crate::ercot::routing::{Route, Router};

    fn midnight(day: NaiveDate) -> String {
        localize(&day.and_time(NaiveTime::MIN)).unwrap().to_rfc3339()
    }

    #[tokio::test]
    async fn test_get_spp_yesterday_load_zones() {
        // Arrange
        let server = MockServer::start().await;
        let client = test_client(&server).await;
        let range = DateRange::parse("yesterday", None).unwrap();
        let day = range.start_date();
        let today = day.succ_opt().unwrap().format("%Y-%m-%d").to_string();
        let yesterday = day.format("%Y-%m-%d").to_string();
        Mock::given(method("GET"))
            .and(path("/np6-905-cd/spp_node_zone_hub"))
            .and(query_param("deliveryDateFrom", yesterday.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_meta": { "totalPages": 1 },
                "fields": [
                    { "name": "deliveryDate" },
                    { "name": "deliveryHour" },
                    { "name": "deliveryInterval" },
                    { "name": "settlementPoint" },
                    { "name": "settlementPointType" },
                    { "name": "settlementPointPrice" },
                    { "name": "DSTFlag" }
                ],
                "data": [
                    [yesterday, 1, 2, "LZ_WEST", "LZ", 21.0, false],
                    [yesterday, 1, 1, "LZ_WEST", "LZ", 20.0, false],
                    [yesterday, 1, 1, "HB_NORTH", "HU", 19.0, false],
                    [today, 1, 1, "LZ_WEST", "LZ", 30.0, false]
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let dataset = client
            .get_spp(
                &range,
                Market::RealTime15Min,
                &LocationFilter::types([LocationType::LoadZone]),
            )
            .await
            .unwrap();

        // Assert
        assert!(matches!(dataset.route, Route::Live(_)));
        let table = &dataset.table;
        assert_eq!(
            &table.columns()[..5],
            ["Time", "End Time", "Location", "Price", "Market"]
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, "Time"), Some(&json!(midnight(day))));
        assert_eq!(table.cell(0, "Price"), Some(&json!(20.0)));
        assert_eq!(table.cell(1, "Price"), Some(&json!(21.0)));
        assert_eq!(table.cell(1, "Market"), Some(&json!("REAL_TIME_15_MIN")));
        assert!(!table.has_column("Hour"));
    }

    #[tokio::test]
    async fn test_soft_errors_return_empty_dataset() {
        // Arrange
        let server = MockServer::start().await;
        mount_token(&server, "test-token").await;
        let client = test_builder(&server).soft_errors(true).build().unwrap();
        Mock::given(method("GET"))
            .and(path("/np6-345-cd/act_sys_load_by_wzn"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let range = DateRange::parse("yesterday", None).unwrap();

        // Act
        let dataset = client
            .get_load(&range, LoadGrouping::WeatherZone)
            .await
            .unwrap();

        // Assert
        assert!(dataset.is_empty());
        assert!(!dataset.is_partial());
    }

    #[tokio::test]
    async fn test_hard_errors_propagate() {
        // Arrange
        let server = MockServer::start().await;
        let client = test_client(&server).await;
        Mock::given(method("GET"))
            .and(path("/np6-345-cd/act_sys_load_by_wzn"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let range = DateRange::parse("yesterday", None).unwrap();

        // Act
        let result = client.get_load(&range, LoadGrouping::WeatherZone).await;

        // Assert
        assert!(matches!(result, Err(GridError::Api { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_unsupported_market_is_invalid_input() {
        // Arrange
        let server = MockServer::start().await;
        let client = test_client(&server).await;
        let range = DateRange::parse("today", None).unwrap();

        // Act
        let spp = client
            .get_spp(&range, Market::RealTimeSced, &LocationFilter::all())
            .await;
        let lmp = client
            .get_lmp(&range, Market::RealTime15Min, LocationType::ResourceNode)
            .await;

        // Assert
        assert!(matches!(spp, Err(GridError::InvalidInput(_))));
        assert!(matches!(lmp, Err(GridError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_straddling_range_is_sorted_without_boundary_duplicates() {
        // Arrange: archive documents overlap the first live day
        let today = fixed_now().with_timezone(&ERCOT_TIMEZONE).date_naive();
        let day = |n: u64| today.checked_sub_days(Days::new(n)).unwrap();
        let header = vec![
            String::from("DeliveryDate"),
            String::from("HourEnding"),
            String::from("SettlementPoint"),
            String::from("SettlementPointPrice"),
        ];
        let row = |d: NaiveDate, fmt: &str, price: f64| {
            vec![
                json!(d.format(fmt).to_string()),
                json!("01:00"),
                json!("HB_NORTH"),
                json!(price),
            ]
        };
        let api = MockApi {
            archive: Table::from_rows(
                header.clone(),
                vec![row(day(89), "%m/%d/%Y", 2.0), row(day(100), "%m/%d/%Y", 1.0)],
            ),
            live: Table::from_rows(
                header,
                vec![row(day(50), "%Y-%m-%d", 3.0), row(day(89), "%Y-%m-%d", 2.0)],
            ),
            ..MockApi::default()
        };
        let range = DateRange::new(
            localize(&day(120).and_time(NaiveTime::MIN)).unwrap(),
            localize(&day(10).and_time(NaiveTime::MIN)).unwrap(),
        )
        .unwrap();

        // Act
        let dataset = fetch_routed(&api, &Router::new(90), Report::SppDayAhead, &range, fixed_now(), |t| {
            shape(t, &range, Some(Market::DayAheadHourly), &LocationFilter::all());
        })
        .await
        .unwrap();

        // Assert
        assert!(matches!(dataset.route, Route::Split { .. }));
        let prices: Vec<_> = dataset.table.column("Price").unwrap().cloned().collect();
        assert_eq!(prices, [json!(1.0), json!(2.0), json!(3.0)]);
    }

    #[tokio::test]
    async fn test_as_prices_keep_every_service_in_an_hour() {
        // Arrange
        let server = MockServer::start().await;
        let client = test_client(&server).await;
        let range = DateRange::parse("yesterday", None).unwrap();
        let day = range.start_date().format("%Y-%m-%d").to_string();
        Mock::given(method("GET"))
            .and(path("/np4-188-cd/dam_clear_price_for_cap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_meta": { "totalPages": 1 },
                "fields": [
                    { "name": "deliveryDate" },
                    { "name": "hourEnding" },
                    { "name": "ancillaryType" },
                    { "name": "MCPC" }
                ],
                "data": [
                    [day, "01:00", "REGUP", 5.0],
                    [day, "01:00", "REGDN", 2.5],
                    [day, "01:00", "RRS", 3.0]
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let dataset = client.get_as_prices(&range).await.unwrap();

        // Assert
        let table = &dataset.table;
        assert_eq!(table.len(), 3);
        let services: Vec<_> = table.column("Ancillary Type").unwrap().cloned().collect();
        assert_eq!(services, [json!("REGUP"), json!("REGDN"), json!("RRS")]);
        assert_eq!(table.cell(2, "Time"), table.cell(0, "Time"));
    }

    #[tokio::test]
    async fn test_shadow_prices_keep_every_constraint_in_an_hour() {
        // Arrange
        let server = MockServer::start().await;
        let client = test_client(&server).await;
        let range = DateRange::parse("yesterday", None).unwrap();
        let day = range.start_date().format("%Y-%m-%d").to_string();
        Mock::given(method("GET"))
            .and(path("/np4-191-cd/dam_shadow_prices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "_meta": { "totalPages": 1 },
                "fields": [
                    { "name": "deliveryDate" },
                    { "name": "hourEnding" },
                    { "name": "constraintId" },
                    { "name": "constraintName" },
                    { "name": "contingencyName" },
                    { "name": "shadowPrice" }
                ],
                "data": [
                    [day, "14:00", 11, "BRAZOS_1", "BASE CASE", 12.5],
                    [day, "14:00", 11, "BRAZOS_1", "DCAT_345", 40.0],
                    [day, "14:00", 27, "WHITEPNT", "BASE CASE", 3.25],
                    [day, "15:00", 11, "BRAZOS_1", "BASE CASE", 9.0]
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Act
        let dataset = client
            .get_shadow_prices(&range, Market::DayAheadHourly)
            .await
            .unwrap();

        // Assert
        let table = &dataset.table;
        assert_eq!(table.len(), 4);
        let prices: Vec<_> = table.column("Shadow Price").unwrap().cloned().collect();
        assert_eq!(prices, [json!(12.5), json!(40.0), json!(3.25), json!(9.0)]);
        assert!(table.has_column("Contingency Name"));
    }

    #[tokio::test]
    async fn test_split_drops_only_the_shared_boundary_interval() {
        // Arrange: the archive document runs one hour past the cutoff
        let today = fixed_now().with_timezone(&ERCOT_TIMEZONE).date_naive();
        let day = |n: u64| today.checked_sub_days(Days::new(n)).unwrap();
        let archive_row = |d: NaiveDate, he: &str, service: &str, mcpc: f64| {
            vec![
                json!(d.format("%m/%d/%Y").to_string()),
                json!(he),
                json!(service),
                json!(mcpc),
            ]
        };
        let live_row = |d: NaiveDate, he: &str, service: &str, mcpc: f64| {
            vec![
                json!(d.format("%Y-%m-%d").to_string()),
                json!(he),
                json!(service),
                json!(mcpc),
            ]
        };
        let api = MockApi {
            archive: Table::from_rows(
                ["Delivery Date", "Hour Ending", "Ancillary Type", "MCPC"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                vec![
                    archive_row(day(90), "24:00", "REGUP", 1.0),
                    archive_row(day(90), "24:00", "REGDN", 2.0),
                    archive_row(day(89), "01:00", "REGUP", 3.0),
                ],
            ),
            live: Table::from_rows(
                ["deliveryDate", "hourEnding", "ancillaryType", "MCPC"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                vec![
                    live_row(day(89), "01:00", "REGUP", 3.0),
                    live_row(day(89), "01:00", "REGDN", 4.0),
                    live_row(day(89), "02:00", "REGUP", 5.0),
                ],
            ),
            ..MockApi::default()
        };
        let range = DateRange::new(
            localize(&day(120).and_time(NaiveTime::MIN)).unwrap(),
            localize(&day(10).and_time(NaiveTime::MIN)).unwrap(),
        )
        .unwrap();

        // Act
        let dataset = fetch_routed(&api, &Router::new(90), Report::AsPrices, &range, fixed_now(), |t| {
            shape(t, &range, None, &LocationFilter::all());
        })
        .await
        .unwrap();

        // Assert
        let Route::Split { live, .. } = dataset.route else {
            panic!("expected split, got {:?}", dataset.route);
        };
        assert_eq!(live.start_date(), day(89));
        let mcpc: Vec<_> = dataset.table.column("MCPC").unwrap().cloned().collect();
        assert_eq!(mcpc, [json!(1.0), json!(2.0), json!(3.0), json!(4.0), json!(5.0)]);
        let services: Vec<_> = dataset
            .table
            .column("Ancillary Type")
            .unwrap()
            .cloned()
            .collect();
        assert_eq!(
            services,
            [json!("REGUP"), json!("REGDN"), json!("REGUP"), json!("REGDN"), json!("REGUP")]
        );
    }

    #[test]
    fn test_forecast_options_pick_report() {
        // Arrange
        let five_min_region = ForecastOptions {
            by_region: true,
            resolution: "5-min".parse().unwrap(),
        };

        // Act & Assert
        assert_eq!(ForecastOptions::default().wind_report(), Report::WindHourly);
        assert_eq!(five_min_region.solar_report(), Report::Solar5MinRegion);
        assert!("daily".parse::<Resolution>().is_err());
        assert_eq!(
            "forecast-zone".parse::<LoadGrouping>().unwrap(),
            LoadGrouping::ForecastZone
        );
    }
}
