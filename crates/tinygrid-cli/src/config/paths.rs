//! Where `config.toml` lives.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Config file name inside a config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable naming the config file itself.
pub const ENV_CONFIG: &str = "TINYGRID_CONFIG";

/// Subdirectory of the user config directory.
const APP_DIR: &str = "tinygrid";

/// Resolves the config file path, first match wins:
///
/// 1. `{dir}/config.toml` when `--dir` is given.
/// 2. `$TINYGRID_CONFIG`, a path to the file.
/// 3. `$XDG_CONFIG_HOME/tinygrid/config.toml`.
/// 4. `$HOME/.config/tinygrid/config.toml`.
///
/// # Errors
///
/// Returns an error if none of the above applies because `HOME` is unset.
pub fn resolve_config_path(dir: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_with(dir, |key| std::env::var(key).ok())
}

fn resolve_with(dir: Option<&PathBuf>, lookup: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    if let Some(d) = dir {
        return Ok(d.join(CONFIG_FILE));
    }

    let non_empty = |key| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(file) = non_empty(ENV_CONFIG) {
        return Ok(PathBuf::from(file));
    }
    if let Some(xdg) = non_empty("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join(APP_DIR).join(CONFIG_FILE));
    }

    let home = non_empty("HOME").context("HOME environment variable is not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join(APP_DIR)
        .join(CONFIG_FILE))
}
