//! `AppConfig` struct and TOML read/write.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tinygrid_api::ercot::{Credentials, ErcotClient, ErcotClientBuilder};
use url::Url;

/// Environment variable overriding `ercot.username`.
pub const ENV_USERNAME: &str = "ERCOT_USERNAME";
/// Environment variable overriding `ercot.password`.
pub const ENV_PASSWORD: &str = "ERCOT_PASSWORD";
/// Environment variable overriding `ercot.subscription_key`.
pub const ENV_SUBSCRIPTION_KEY: &str = "ERCOT_SUBSCRIPTION_KEY";

const REDACTED: &str = "<redacted>";

const TEMPLATE: &str = r#"# tinygrid configuration
#
# Credentials may also come from ERCOT_USERNAME, ERCOT_PASSWORD and
# ERCOT_SUBSCRIPTION_KEY, which take precedence over this file.

[ercot]
# username = "you@example.com"
# password = ""
# subscription_key = ""

# base_url = "https://api.ercot.com/api/public-reports"
# timeout_secs = 30
# max_retries = 3
# retry_min_wait_secs = 1
# retry_max_wait_secs = 60
# page_size = 10000
# max_concurrent_requests = 5
# requests_per_minute = 30
# historical_threshold_days = 90
# archive_batch_size = 1000
# archive_chunk_days = 31
# soft_errors = false
"#;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// ERCOT client settings.
    #[serde(default)]
    pub ercot: ErcotConfig,
}

/// The `[ercot]` table. Unset keys keep the client defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[allow(clippy::module_name_repetitions)]
pub struct ErcotConfig {
    /// Account username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Account password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// API Management subscription key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_key: Option<String>,
    /// Public-reports base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Token endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retries after the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Lower bound of the retry backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_min_wait_secs: Option<u64>,
    /// Upper bound of the retry backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_wait_secs: Option<u64>,
    /// Rows per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Page requests in flight at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<usize>,
    /// Client-side request budget; `0` disables the limiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    /// Age in days past which data comes from the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_threshold_days: Option<u32>,
    /// Documents per bulk download request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_batch_size: Option<usize>,
    /// Days per archive listing chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_chunk_days: Option<u32>,
    /// Return empty datasets instead of fetch errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_errors: Option<bool>,
}

impl AppConfig {
    /// Loads config from a TOML file. Returns default if file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Loads config and overlays credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::load`].
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.ercot.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Saves config to a TOML file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or file write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config to TOML")?;
        write_file(path, &content)
    }

    /// Writes the commented starter config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and `force` is false, or the
    /// write fails.
    pub fn write_template(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        write_file(path, TEMPLATE)
    }

    /// Copy with secrets replaced, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let redact = |v: &Option<String>| v.as_ref().map(|_| String::from(REDACTED));
        Self {
            ercot: ErcotConfig {
                password: redact(&self.ercot.password),
                subscription_key: redact(&self.ercot.subscription_key),
                ..self.ercot.clone()
            },
        }
    }
}

impl ErcotConfig {
    /// Overrides credentials with non-empty values from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_USERNAME) {
            self.username = Some(v);
        }
        if let Some(v) = non_empty(ENV_PASSWORD) {
            self.password = Some(v);
        }
        if let Some(v) = non_empty(ENV_SUBSCRIPTION_KEY) {
            self.subscription_key = Some(v);
        }
    }

    /// Credentials, if all three parts are present.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password, &self.subscription_key) {
            (Some(user), Some(pass), Some(key)) => Some(Credentials::new(user, pass, key)),
            _ => None,
        }
    }

    /// Client builder carrying every configured setting.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are incomplete or a URL is invalid.
    pub fn client_builder(&self) -> Result<ErcotClientBuilder> {
        let credentials = self.credentials().with_context(|| {
            format!(
                "ERCOT credentials are required: set {ENV_USERNAME}, {ENV_PASSWORD} and \
                 {ENV_SUBSCRIPTION_KEY}, or fill in [ercot] in config.toml"
            )
        })?;
        let mut builder = ErcotClient::builder().credentials(credentials);

        if let Some(url) = &self.base_url {
            builder = builder.base_url(parse_url("base_url", url)?);
        }
        if let Some(url) = &self.auth_url {
            builder = builder.auth_url(parse_url("auth_url", url)?);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(n) = self.max_retries {
            builder = builder.max_retries(n);
        }
        if let Some(secs) = self.retry_min_wait_secs {
            builder = builder.retry_min_wait(Duration::from_secs(secs));
        }
        if let Some(secs) = self.retry_max_wait_secs {
            builder = builder.retry_max_wait(Duration::from_secs(secs));
        }
        if let Some(n) = self.page_size {
            builder = builder.page_size(n);
        }
        if let Some(n) = self.max_concurrent_requests {
            builder = builder.max_concurrent_requests(n);
        }
        match self.requests_per_minute {
            Some(0) => builder = builder.disable_rate_limit(),
            Some(n) => builder = builder.requests_per_minute(n),
            None => {}
        }
        if let Some(days) = self.historical_threshold_days {
            builder = builder.historical_threshold_days(days);
        }
        if let Some(n) = self.archive_batch_size {
            builder = builder.archive_batch_size(n);
        }
        if let Some(days) = self.archive_chunk_days {
            builder = builder.archive_chunk_days(days);
        }
        if let Some(soft) = self.soft_errors {
            builder = builder.soft_errors(soft);
        }
        Ok(builder)
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).with_context(|| format!("ercot.{key} is not a valid URL: {value}"))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use super::*;

    fn full_credentials() -> ErcotConfig {
        ErcotConfig {
            username: Some(String::from("user@example.com")),
            password: Some(String::from("hunter2")),
            subscription_key: Some(String::from("key-123")),
            ..ErcotConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        // Arrange & Act
        let config = AppConfig::default();

        // Assert
        assert!(config.ercot.username.is_none());
        assert!(config.ercot.credentials().is_none());
    }

    #[test]
    fn test_parse_ercot_table() {
        // Arrange
        let toml_str = r#"
            [ercot]
            username = "u"
            page_size = 500
            requests_per_minute = 0
            soft_errors = true
        "#;

        // Act
        let config: AppConfig = toml::from_str(toml_str).unwrap();

        // Assert
        assert_eq!(config.ercot.username.as_deref(), Some("u"));
        assert_eq!(config.ercot.page_size, Some(500));
        assert_eq!(config.ercot.requests_per_minute, Some(0));
        assert_eq!(config.ercot.soft_errors, Some(true));
        assert!(config.ercot.password.is_none());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        // Arrange
        let path = Path::new("/tmp/nonexistent_tinygrid_test/config.toml");

        // Act
        let config = AppConfig::load(path).unwrap();

        // Assert
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        let config = AppConfig {
            ercot: ErcotConfig {
                archive_chunk_days: Some(7),
                ..full_credentials()
            },
        };

        // Act
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();

        // Assert
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_template_parses_and_is_not_overwritten() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        // Act
        AppConfig::write_template(&path, false).unwrap();
        let second = AppConfig::write_template(&path, false);
        let loaded = AppConfig::load(&path).unwrap();

        // Assert
        assert!(second.is_err());
        assert_eq!(loaded, AppConfig::default());
        assert!(AppConfig::write_template(&path, true).is_ok());
    }

    #[test]
    fn test_env_overrides_file_credentials() {
        // Arrange
        let mut config = full_credentials();
        let env: HashMap<&str, &str> = [(ENV_PASSWORD, "from-env"), (ENV_USERNAME, "  ")]
            .into_iter()
            .collect();

        // Act
        config.apply_env(|key| env.get(key).map(|v| String::from(*v)));

        // Assert
        assert_eq!(config.password.as_deref(), Some("from-env"));
        assert_eq!(config.username.as_deref(), Some("user@example.com"));
        assert_eq!(config.subscription_key.as_deref(), Some("key-123"));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        // Arrange
        let config = AppConfig {
            ercot: full_credentials(),
        };

        // Act
        let shown = config.redacted();

        // Assert
        assert_eq!(shown.ercot.username.as_deref(), Some("user@example.com"));
        assert_eq!(shown.ercot.password.as_deref(), Some(REDACTED));
        assert_eq!(shown.ercot.subscription_key.as_deref(), Some(REDACTED));
    }

    #[test]
    fn test_client_builder_requires_credentials() {
        // Arrange
        let config = ErcotConfig {
            username: Some(String::from("u")),
            ..ErcotConfig::default()
        };

        // Act
        let err = config.client_builder().unwrap_err();

        // Assert
        assert!(err.to_string().contains(ENV_SUBSCRIPTION_KEY));
    }

    #[test]
    fn test_client_builder_rejects_bad_url() {
        // Arrange
        let config = ErcotConfig {
            base_url: Some(String::from("not a url")),
            ..full_credentials()
        };

        // Act
        let err = config.client_builder().unwrap_err();

        // Assert
        assert!(err.to_string().contains("ercot.base_url"));
    }

    #[test]
    fn test_client_builder_builds() {
        // Arrange
        let config = ErcotConfig {
            base_url: Some(String::from("http://127.0.0.1:9/api/")),
            requests_per_minute: Some(0),
            soft_errors: Some(true),
            ..full_credentials()
        };

        // Act
        let client = config.client_builder().unwrap().build().unwrap();

        // Assert
        assert!(client.soft_errors());
        assert_eq!(client.auth().subscription_key(), "key-123");
    }
}
