//! Remote reports used by the unified accessors and their query shapes.

use std::fmt;

use super::dates::{DateRange, format_api_date};

/// Query-parameter family a report uses for its date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateParams {
    /// `deliveryDateFrom` / `deliveryDateTo`.
    DeliveryDate,
    /// Delivery date plus the full hour (1-24) and interval (1-4) span.
    DeliveryInterval,
    /// `SCEDTimestampFrom` / `SCEDTimestampTo`.
    ScedTimestamp,
    /// `operatingDayFrom` / `operatingDayTo`.
    OperatingDay,
    /// `postedDatetimeFrom` / `postedDatetimeTo`.
    PostedDatetime,
}

impl DateParams {
    /// Query pairs restricting a live request to `range`.
    #[must_use]
    pub fn query(self, range: &DateRange) -> Vec<(&'static str, String)> {
        let from = format_api_date(&range.start);
        let to = format_api_date(&range.end);
        match self {
            Self::DeliveryDate => vec![("deliveryDateFrom", from), ("deliveryDateTo", to)],
            Self::DeliveryInterval => vec![
                ("deliveryDateFrom", from),
                ("deliveryDateTo", to),
                ("deliveryHourFrom", String::from("1")),
                ("deliveryHourTo", String::from("24")),
                ("deliveryIntervalFrom", String::from("1")),
                ("deliveryIntervalTo", String::from("4")),
            ],
            Self::ScedTimestamp => vec![("SCEDTimestampFrom", from), ("SCEDTimestampTo", to)],
            Self::OperatingDay => vec![("operatingDayFrom", from), ("operatingDayTo", to)],
            Self::PostedDatetime => {
                vec![("postedDatetimeFrom", from), ("postedDatetimeTo", to)]
            }
        }
    }
}

/// One ERCOT public report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Report {
    /// NP6-905: 15-minute settlement point prices.
    SppRealTime,
    /// NP4-190: day-ahead settlement point prices.
    SppDayAhead,
    /// NP6-788: SCED LMP by node, zone and hub.
    LmpNodeZoneHub,
    /// NP6-787: SCED LMP by electrical bus.
    LmpElectricalBus,
    /// NP4-183: day-ahead hourly LMP.
    LmpDayAhead,
    /// NP4-188: day-ahead ancillary service clearing prices.
    AsPrices,
    /// NP4-33: day-ahead ancillary service plan.
    AsPlan,
    /// NP4-191: day-ahead shadow prices.
    ShadowPricesDayAhead,
    /// NP6-86: SCED shadow prices for binding constraints.
    ShadowPricesSced,
    /// NP4-732: hourly wind actuals and forecast.
    WindHourly,
    /// NP4-742: hourly wind by region.
    WindHourlyRegion,
    /// NP4-733: 5-minute wind actuals.
    Wind5Min,
    /// NP4-743: 5-minute wind by region.
    Wind5MinRegion,
    /// NP4-737: hourly solar actuals and forecast.
    SolarHourly,
    /// NP4-745: hourly solar by region.
    SolarHourlyRegion,
    /// NP4-738: 5-minute solar actuals.
    Solar5Min,
    /// NP4-746: 5-minute solar by region.
    Solar5MinRegion,
    /// NP6-345: actual load by weather zone.
    LoadWeatherZone,
    /// NP6-346: actual load by forecast zone.
    LoadForecastZone,
    /// NP6-626: DC tie flows (archive only).
    DcTieFlows,
    /// NP6-625: total generation (archive only).
    TotalGeneration,
    /// NP6-235: system-wide SCED actuals (archive only).
    SystemWideActuals,
}

impl Report {
    /// Every report.
    pub const ALL: [Self; 22] = [
        Self::SppRealTime,
        Self::SppDayAhead,
        Self::LmpNodeZoneHub,
        Self::LmpElectricalBus,
        Self::LmpDayAhead,
        Self::AsPrices,
        Self::AsPlan,
        Self::ShadowPricesDayAhead,
        Self::ShadowPricesSced,
        Self::WindHourly,
        Self::WindHourlyRegion,
        Self::Wind5Min,
        Self::Wind5MinRegion,
        Self::SolarHourly,
        Self::SolarHourlyRegion,
        Self::Solar5Min,
        Self::Solar5MinRegion,
        Self::LoadWeatherZone,
        Self::LoadForecastZone,
        Self::DcTieFlows,
        Self::TotalGeneration,
        Self::SystemWideActuals,
    ];

    /// Endpoint path relative to the public-reports base URL.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::SppRealTime => "/np6-905-cd/spp_node_zone_hub",
            Self::SppDayAhead => "/np4-190-cd/dam_stlmnt_pnt_prices",
            Self::LmpNodeZoneHub => "/np6-788-cd/lmp_node_zone_hub",
            Self::LmpElectricalBus => "/np6-787-cd/lmp_electrical_bus",
            Self::LmpDayAhead => "/np4-183-cd/dam_hourly_lmp",
            Self::AsPrices => "/np4-188-cd/dam_clear_price_for_cap",
            Self::AsPlan => "/np4-33-cd/dam_as_plan",
            Self::ShadowPricesDayAhead => "/np4-191-cd/dam_shadow_prices",
            Self::ShadowPricesSced => "/np6-86-cd/shdw_prices_bnd_trns_const",
            Self::WindHourly => "/np4-732-cd/wpp_hrly_avrg_actl_fcast",
            Self::WindHourlyRegion => "/np4-742-cd/wpp_hrly_actual_fcast_geo",
            Self::Wind5Min => "/np4-733-cd/wpp_actual_5min_avg_values",
            Self::Wind5MinRegion => "/np4-743-cd/wpp_actual_5min_avg_values_geo",
            Self::SolarHourly => "/np4-737-cd/spp_hrly_avrg_actl_fcast",
            Self::SolarHourlyRegion => "/np4-745-cd/spp_hrly_actual_fcast_geo",
            Self::Solar5Min => "/np4-738-cd/spp_actual_5min_avg_values",
            Self::Solar5MinRegion => "/np4-746-cd/spp_actual_5min_avg_values_geo",
            Self::LoadWeatherZone => "/np6-345-cd/act_sys_load_by_wzn",
            Self::LoadForecastZone => "/np6-346-cd/act_sys_load_by_fzn",
            Self::DcTieFlows => "/np6-626-cd/dc_tie",
            Self::TotalGeneration => "/np6-625-cd/se_totalgen",
            Self::SystemWideActuals => "/np6-235-cd/sys_wide_actuals",
        }
    }

    /// Archive identifier: the first path segment (`np6-905-cd`).
    #[must_use]
    pub fn emil_id(self) -> &'static str {
        self.path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }

    /// Date parameter family for live requests.
    #[must_use]
    pub const fn date_params(self) -> DateParams {
        match self {
            Self::SppRealTime => DateParams::DeliveryInterval,
            Self::SppDayAhead
            | Self::LmpDayAhead
            | Self::AsPrices
            | Self::AsPlan
            | Self::ShadowPricesDayAhead => DateParams::DeliveryDate,
            Self::LmpNodeZoneHub | Self::LmpElectricalBus | Self::ShadowPricesSced => {
                DateParams::ScedTimestamp
            }
            Self::LoadWeatherZone | Self::LoadForecastZone => DateParams::OperatingDay,
            Self::WindHourly
            | Self::WindHourlyRegion
            | Self::Wind5Min
            | Self::Wind5MinRegion
            | Self::SolarHourly
            | Self::SolarHourlyRegion
            | Self::Solar5Min
            | Self::Solar5MinRegion
            | Self::DcTieFlows
            | Self::TotalGeneration
            | Self::SystemWideActuals => DateParams::PostedDatetime,
        }
    }

    /// Columns that identify one row once a table is shaped.
    ///
    /// Used to drop rows the archive and live halves of a split range
    /// both return. Forecast reports are keyed by the whole row because
    /// every posting repeats the same forecast hours.
    #[must_use]
    pub const fn natural_key(self) -> &'static [&'static str] {
        match self {
            Self::SppRealTime
            | Self::SppDayAhead
            | Self::LmpNodeZoneHub
            | Self::LmpElectricalBus
            | Self::LmpDayAhead => &["Time", "Location"],
            Self::AsPrices | Self::AsPlan => &["Time", "Ancillary Type"],
            Self::ShadowPricesDayAhead | Self::ShadowPricesSced => {
                &["Time", "Constraint ID", "Constraint Name", "Contingency Name"]
            }
            Self::LoadWeatherZone | Self::LoadForecastZone => &["Time"],
            Self::WindHourly
            | Self::WindHourlyRegion
            | Self::Wind5Min
            | Self::Wind5MinRegion
            | Self::SolarHourly
            | Self::SolarHourlyRegion
            | Self::Solar5Min
            | Self::Solar5MinRegion
            | Self::DcTieFlows
            | Self::TotalGeneration
            | Self::SystemWideActuals => &[],
        }
    }

    /// Whether the live REST endpoint serves this report.
    #[must_use]
    pub const fn live_available(self) -> bool {
        !matches!(
            self,
            Self::DcTieFlows | Self::TotalGeneration | Self::SystemWideActuals
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
