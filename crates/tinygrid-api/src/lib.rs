//! Client library for the ERCOT public-reports API.
//!
//! Wraps token authentication, retries, rate limiting and the live /
//! archive cutover behind a handful of dataset accessors returning
//! [`table::Table`]s.

/// ERCOT API client.
pub mod ercot;

/// Column-oriented result tables.
pub mod table;
