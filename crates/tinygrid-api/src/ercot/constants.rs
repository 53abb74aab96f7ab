//! ERCOT markets, location sets, column names and service limits.

use std::fmt;
use std::str::FromStr;

use super::error::GridError;

pub use super::auth::{AUTH_URL, CLIENT_ID};
pub use super::rate_limiter::ERCOT_REQUESTS_PER_MINUTE as API_RATE_LIMIT;

/// Base URL of the public-reports REST API.
pub const PUBLIC_API_BASE_URL: &str = "https://api.ercot.com/api/public-reports";

/// Days after which data is served from the archive rather than live.
pub const HISTORICAL_THRESHOLD_DAYS: u32 = 90;

/// Maximum documents per bulk archive download.
pub const MAX_BULK_DOWNLOAD_FILES: usize = 1000;

/// Price market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    /// Security-constrained economic dispatch, roughly every 5 minutes.
    RealTimeSced,
    /// 15-minute real-time settlement.
    RealTime15Min,
    /// Day-ahead market, hourly.
    DayAheadHourly,
}

impl Market {
    /// Canonical identifier, as written to the `Market` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RealTimeSced => "REAL_TIME_SCED",
            Self::RealTime15Min => "REAL_TIME_15_MIN",
            Self::DayAheadHourly => "DAY_AHEAD_HOURLY",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "REAL_TIME_SCED" | "SCED" => Ok(Self::RealTimeSced),
            "REAL_TIME_15_MIN" | "RT" | "RT15" => Ok(Self::RealTime15Min),
            "DAY_AHEAD_HOURLY" | "DAM" | "DA" => Ok(Self::DayAheadHourly),
            _ => Err(GridError::invalid(format!("unknown market: {s:?}"))),
        }
    }
}

/// Settlement point category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationType {
    /// `LZ_*` points.
    LoadZone,
    /// `HB_*` points.
    TradingHub,
    /// DC ties to neighbouring grids.
    DcTie,
    /// Everything that is neither a load zone nor a hub.
    ResourceNode,
    /// Electrical buses (SCED LMP only).
    ElectricalBus,
}

impl LocationType {
    /// Human-readable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadZone => "Load Zone",
            Self::TradingHub => "Trading Hub",
            Self::DcTie => "DC Tie",
            Self::ResourceNode => "Resource Node",
            Self::ElectricalBus => "Electrical Bus",
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "loadzone" | "lz" => Ok(Self::LoadZone),
            "tradinghub" | "hub" | "hb" => Ok(Self::TradingHub),
            "dctie" => Ok(Self::DcTie),
            "resourcenode" | "node" | "rn" => Ok(Self::ResourceNode),
            "electricalbus" | "bus" => Ok(Self::ElectricalBus),
            _ => Err(GridError::invalid(format!("unknown location type: {s:?}"))),
        }
    }
}

/// ERCOT load zones.
pub const LOAD_ZONES: [&str; 8] = [
    "LZ_HOUSTON",
    "LZ_NORTH",
    "LZ_SOUTH",
    "LZ_WEST",
    "LZ_AEN",
    "LZ_CPS",
    "LZ_LCRA",
    "LZ_RAYBN",
];

/// ERCOT trading hubs.
pub const TRADING_HUBS: [&str; 7] = [
    "HB_HOUSTON",
    "HB_NORTH",
    "HB_SOUTH",
    "HB_WEST",
    "HB_BUSAVG",
    "HB_HUBAVG",
    "HB_PAN",
];

/// DC ties: East and North to SPP; Laredo, Railroad and South to CFE.
pub const DC_TIES: [&str; 5] = ["DC_E", "DC_L", "DC_N", "DC_R", "DC_S"];

/// Raw report column name to canonical name.
pub const COLUMN_MAPPINGS: &[(&str, &str)] = &[
    // location
    ("ElectricalBus", "Location"),
    ("SettlementPoint", "Location"),
    ("SettlementPointName", "Location"),
    ("Settlement Point", "Location"),
    ("Settlement Point Name", "Location"),
    ("SettlementPointType", "Location Type"),
    ("Settlement Point Type", "Location Type"),
    // price
    ("SettlementPointPrice", "Price"),
    ("Settlement Point Price", "Price"),
    ("LMP", "Price"),
    ("ShadowPrice", "Shadow Price"),
    ("MaxShadowPrice", "Max Shadow Price"),
    ("SystemLambda", "System Lambda"),
    // ancillary services
    ("AncillaryType", "Ancillary Type"),
    // time
    ("SCEDTimestamp", "Timestamp"),
    ("SCED Timestamp", "Timestamp"),
    ("DeliveryDate", "Date"),
    ("Delivery Date", "Date"),
    ("OperDay", "Date"),
    ("Oper Day", "Date"),
    ("DeliveryHour", "Hour"),
    ("Delivery Hour", "Hour"),
    ("DeliveryInterval", "Interval"),
    ("Delivery Interval", "Interval"),
    ("HourEnding", "Hour Ending"),
    ("PostedDatetime", "Posted Time"),
    ("Posted Datetime", "Posted Time"),
    // flags
    ("DSTFlag", "DST"),
    ("DST Flag", "DST"),
    ("RepeatedHourFlag", "Repeated Hour"),
    ("Repeated Hour Flag", "Repeated Hour"),
    // constraints
    ("ConstraintId", "Constraint ID"),
    ("ConstraintID", "Constraint ID"),
    ("ConstraintName", "Constraint Name"),
    ("ConstraintLimit", "Constraint Limit"),
    ("ConstraintValue", "Constraint Value"),
    ("ContingencyName", "Contingency Name"),
    ("ViolatedMW", "Violated MW"),
    ("ViolationAmount", "Violation Amount"),
    ("FromStation", "From Station"),
    ("FromStationkV", "From Station kV"),
    ("ToStation", "To Station"),
    ("ToStationkV", "To Station kV"),
    ("CCTStatus", "CCT Status"),
    // load
    ("SystemTotal", "System Total"),
    ("FarWest", "Far West"),
    ("NorthCentral", "North Central"),
    ("SouthCentral", "South Central"),
    // forecasts
    ("HourEndingSystemWide", "System Wide"),
    ("HourEndingCOPHSL", "COP HSL"),
    ("HourEndingSTWPF", "STWPF"),
    ("HourEndingWGRPP", "WGRPP"),
    ("HourEndingSolar", "Solar"),
    ("GeoMagLatitude", "Latitude"),
    ("GeoMagLongitude", "Longitude"),
];

/// Canonical name for a raw column, if it has one.
///
/// Matching ignores ASCII case so camelCase API field names
/// (`settlementPoint`) map like their CSV headers (`SettlementPoint`).
#[must_use]
pub fn canonical_column(raw: &str) -> Option<&'static str> {
    COLUMN_MAPPINGS
        .iter()
        .find_map(|(from, to)| from.eq_ignore_ascii_case(raw).then_some(*to))
}
