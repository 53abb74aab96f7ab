//! ERCOT public-reports API client module.
//!
//! Handles token authentication, retry with backoff, client-side rate
//! limiting, pagination, and routing between the live REST API and the
//! historical document archive.

mod api;
mod archive;
mod auth;
mod client;
pub mod constants;
mod datasets;
pub mod dates;
mod error;
mod polling;
mod rate_limiter;
mod report;
mod retry;
mod routing;
pub mod transforms;

#[allow(clippy::module_name_repetitions)]
pub use api::{ErcotApi, LocalErcotApi};
pub use archive::{
    ArchiveDocument, ArchiveFailure, ArchiveFetch, ArchiveLink, BulkDownload, parse_document,
};
#[allow(clippy::module_name_repetitions)]
pub use auth::{Credentials, ErcotAuth};
#[allow(clippy::module_name_repetitions)]
pub use client::{ErcotClient, ErcotClientBuilder};
pub use constants::{LocationType, Market};
pub use datasets::{ForecastOptions, LoadGrouping, Resolution, shape};
pub use dates::DateRange;
pub use error::{GridError, GridResult};
pub use polling::{PollResult, PollSummary, Poller, StopHandle, StopReason};
pub use rate_limiter::RateLimiter;
pub use report::{DateParams, Report};
pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper};
pub use routing::{Dataset, Route, Router, fetch_routed};
pub use transforms::LocationFilter;
