//! Application configuration module.
//!
//! Reads the `[ercot]` table from `config.toml`, overlays credentials from
//! the environment and turns the result into a client builder.

#[allow(clippy::module_inception)]
mod config;
mod paths;

#[allow(clippy::module_name_repetitions)]
pub use config::{AppConfig, ErcotConfig};
pub use paths::resolve_config_path;
