//! `ErcotApi` trait definition.
#![allow(clippy::future_not_send)]

use super::archive::ArchiveFetch;
use super::dates::DateRange;
use super::error::GridResult;
use super::report::Report;
use crate::table::Table;

/// Data source the live/archive router draws from.
///
/// Abstracts the two transports for mock substitution in tests.
/// Uses `trait_variant::make` to generate a `Send`-bound async trait.
#[allow(clippy::module_name_repetitions)]
#[trait_variant::make(ErcotApi: Send)]
pub trait LocalErcotApi {
    /// Fetches every page of `report` for `range` from the live REST API.
    ///
    /// # Errors
    ///
    /// Returns an error if the report has no live endpoint, or if any
    /// page request fails after retries.
    async fn fetch_live(&self, report: Report, range: &DateRange) -> GridResult<Table>;

    /// Fetches `report` for `range` from the document archive.
    ///
    /// Per-chunk and per-document failures are reported inside the
    /// returned [`ArchiveFetch`].
    ///
    /// # Errors
    ///
    /// Returns an error only when every chunk of the range failed.
    async fn fetch_archive(&self, report: Report, range: &DateRange) -> GridResult<ArchiveFetch>;
}
