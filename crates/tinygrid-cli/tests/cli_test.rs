#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo_bin_cmd;
use predicates::prelude::{PredicateBooleanExt, predicate};

const CREDENTIAL_VARS: [&str; 3] = ["ERCOT_USERNAME", "ERCOT_PASSWORD", "ERCOT_SUBSCRIPTION_KEY"];

/// Command isolated from the caller's config and credentials.
fn tinygrid(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("tinygrid");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("OTEL_EXPORTER_OTLP_ENDPOINT");
    cmd.arg("--dir").arg(dir);
    cmd
}

fn with_credentials(mut cmd: Command) -> Command {
    cmd.env("ERCOT_USERNAME", "user@example.com")
        .env("ERCOT_PASSWORD", "hunter2")
        .env("ERCOT_SUBSCRIPTION_KEY", "key-123");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    // Arrange & Act & Assert
    let mut cmd = cargo_bin_cmd!("tinygrid");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("spp"))
        .stdout(predicate::str::contains("shadow-prices"))
        .stdout(predicate::str::contains("archive"))
        .stdout(predicate::str::contains("poll"));
}

#[test]
fn test_spp_help_shows_range_flags() {
    // Arrange & Act & Assert
    let mut cmd = cargo_bin_cmd!("tinygrid");
    cmd.args(["spp", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--start"))
        .stdout(predicate::str::contains("--location-types"))
        .stdout(predicate::str::contains("--output"));
}

#[test]
fn test_archive_list_help_shows_lowercase_id() {
    // Arrange & Act & Assert
    let mut cmd = cargo_bin_cmd!("tinygrid");
    cmd.args(["archive", "list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("np6-905-cd"))
        .stdout(predicate::str::contains("NP6-905-CD").not());
}

#[test]
fn test_config_init_writes_template() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act & Assert
    tinygrid(dir.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote"));
    let written = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(written.contains("[ercot]"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    tinygrid(dir.path())
        .args(["config", "init"])
        .assert()
        .success();

    // Act & Assert
    tinygrid(dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_show_redacts_secrets() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[ercot]\nusername = \"file-user\"\npage_size = 500\n",
    )
    .unwrap();

    // Act & Assert
    with_credentials(tinygrid(dir.path()))
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("user@example.com"))
        .stdout(predicate::str::contains("page_size = 500"))
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("key-123").not());
}

#[test]
fn test_spp_without_credentials_fails() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act & Assert
    tinygrid(dir.path())
        .args(["spp", "--start", "2024-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ERCOT credentials are required"));
}

#[test]
fn test_spp_rejects_unknown_market() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act & Assert
    tinygrid(dir.path())
        .args(["spp", "--market", "hourly-ish"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown market"));
}

#[test]
fn test_spp_rejects_bad_date() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act & Assert
    with_credentials(tinygrid(dir.path()))
        .args(["spp", "--start", "next tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid date range"));
}

#[test]
fn test_spp_rejects_inverted_range() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act & Assert
    with_credentials(tinygrid(dir.path()))
        .args(["spp", "--start", "2024-01-05", "--end", "2024-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid date range"));
}

#[test]
fn test_lmp_rejects_fifteen_minute_market() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();

    // Act & Assert
    with_credentials(tinygrid(dir.path()))
        .args(["lmp", "--market", "RT", "--start", "2024-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("REAL_TIME_SCED or DAY_AHEAD_HOURLY"));
}

#[test]
fn test_bad_base_url_in_config_fails() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[ercot]\nbase_url = \"::not a url::\"\n",
    )
    .unwrap();

    // Act & Assert
    with_credentials(tinygrid(dir.path()))
        .args(["as-prices", "--start", "2024-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ercot.base_url"));
}
