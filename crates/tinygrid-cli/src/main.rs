//! tinygrid - ERCOT market data CLI.

/// Application configuration (TOML).
mod config;
/// CSV output.
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tinygrid_api::ercot::{
    Dataset, DateRange, ErcotClient, ForecastOptions, GridError, LoadGrouping, LocationFilter,
    LocationType, Market, Poller, Resolution, StopReason,
};
use tracing::instrument;
use tracing_subscriber::filter::EnvFilter;
#[cfg(not(feature = "otel"))]
use tracing_subscriber::fmt;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{AppConfig, resolve_config_path};
use crate::output::{links_table, write_table};

/// CLI argument parser.
#[derive(Parser)]
#[command(about, version)]
struct Cli {
    /// Override config directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Settlement point prices.
    Spp(SppArgs),
    /// Locational marginal prices.
    Lmp(LmpArgs),
    /// Day-ahead ancillary service clearing prices.
    AsPrices(RangeArgs),
    /// Day-ahead ancillary service plan.
    AsPlan(RangeArgs),
    /// Transmission constraint shadow prices.
    ShadowPrices(ShadowPriceArgs),
    /// Actual system load.
    Load(LoadArgs),
    /// Wind power actuals and forecasts.
    Wind(ForecastArgs),
    /// Solar power actuals and forecasts.
    Solar(ForecastArgs),
    /// DC tie flows (archive only).
    DcTies(RangeArgs),
    /// Total ERCOT generation (archive only).
    TotalGeneration(RangeArgs),
    /// System-wide actuals (archive only).
    SystemActuals(RangeArgs),
    /// Historical document archive.
    Archive(ArchiveCommand),
    /// Repeatedly fetch a dataset.
    Poll(PollCommand),
    /// Verify credentials by requesting an access token.
    Token,
    /// Manage the configuration file.
    Config(ConfigCommand),
}

/// Date range and output shared by every dataset subcommand.
#[derive(clap::Args)]
struct RangeArgs {
    /// Start date: "today", "yesterday", "latest" or a date/datetime
    /// such as "2024-01-01" or "2024-01-01T06:00:00" (Central time).
    #[arg(long, default_value = "today")]
    start: String,

    /// End date, exclusive (default: start + 1 day). Same formats as --start.
    #[arg(long)]
    end: Option<String>,

    /// Write CSV to this file instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl RangeArgs {
    fn range(&self) -> Result<DateRange> {
        DateRange::parse(&self.start, self.end.as_deref()).context("invalid date range")
    }
}

/// Arguments for the `spp` subcommand.
#[derive(clap::Args)]
struct SppArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Market: "RT" (15-minute real time) or "DAM" (day-ahead).
    #[arg(long, default_value = "RT")]
    market: Market,

    /// Comma-separated settlement point names (e.g. "HB_HOUSTON,LZ_WEST").
    #[arg(long, value_delimiter = ',')]
    locations: Vec<String>,

    /// Comma-separated location types: load-zone, hub, node, dc-tie.
    #[arg(long, value_delimiter = ',')]
    location_types: Vec<LocationType>,
}

impl SppArgs {
    fn filter(&self) -> LocationFilter {
        LocationFilter {
            names: self.locations.clone(),
            types: self.location_types.clone(),
        }
    }
}

/// Arguments for the `lmp` subcommand.
#[derive(clap::Args)]
struct LmpArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Market: "SCED" or "DAM".
    #[arg(long, default_value = "SCED")]
    market: Market,

    /// Location type; "bus" selects the electrical-bus report under SCED.
    #[arg(long, default_value = "node")]
    location_type: LocationType,
}

/// Arguments for the `shadow-prices` subcommand.
#[derive(clap::Args)]
struct ShadowPriceArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Market: "SCED" or "DAM".
    #[arg(long, default_value = "SCED")]
    market: Market,
}

/// Arguments for the `load` subcommand.
#[derive(clap::Args)]
struct LoadArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Zone grouping: "weather-zone" or "forecast-zone".
    #[arg(long = "by", default_value = "weather-zone")]
    grouping: LoadGrouping,
}

/// Arguments for the `wind` and `solar` subcommands.
#[derive(clap::Args)]
struct ForecastArgs {
    #[command(flatten)]
    range: RangeArgs,

    /// Break down by geographic region.
    #[arg(long)]
    by_region: bool,

    /// Resolution: "hourly" or "5min".
    #[arg(long, default_value = "hourly")]
    resolution: Resolution,
}

impl ForecastArgs {
    const fn options(&self) -> ForecastOptions {
        ForecastOptions {
            by_region: self.by_region,
            resolution: self.resolution,
        }
    }
}

/// Arguments for the `archive` subcommand.
#[derive(clap::Args)]
struct ArchiveCommand {
    /// Archive subcommand to run.
    #[command(subcommand)]
    command: ArchiveSubcommands,
}

/// Available archive subcommands.
#[derive(Subcommand)]
enum ArchiveSubcommands {
    /// List archived documents posted in a date range.
    List(ArchiveListArgs),
}

/// Arguments for the `archive list` subcommand.
#[derive(clap::Args)]
struct ArchiveListArgs {
    /// Report identifier, e.g. "np6-905-cd" (case-insensitive).
    #[arg(long, required = true)]
    emil_id: String,

    #[command(flatten)]
    range: RangeArgs,
}

/// Arguments for the `poll` subcommand.
#[derive(clap::Args)]
struct PollCommand {
    /// Poll subcommand to run.
    #[command(subcommand)]
    command: PollSubcommands,
}

/// Available poll subcommands.
#[derive(Subcommand)]
enum PollSubcommands {
    /// Poll today's settlement point prices.
    Spp(PollSppArgs),
}

/// Arguments for the `poll spp` subcommand.
#[derive(clap::Args)]
struct PollSppArgs {
    /// Seconds between fetches (minimum 2).
    #[arg(long, default_value_t = 60)]
    interval: u64,

    /// Stop after this many fetches (default: run until Ctrl+C).
    #[arg(long)]
    max_iterations: Option<u64>,

    /// Market: "RT" or "DAM".
    #[arg(long, default_value = "RT")]
    market: Market,

    /// Comma-separated settlement point names.
    #[arg(long, value_delimiter = ',')]
    locations: Vec<String>,

    /// Overwrite this file with the latest rows instead of writing to stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

/// Arguments for the `config` subcommand.
#[derive(clap::Args)]
struct ConfigCommand {
    /// Config subcommand to run.
    #[command(subcommand)]
    command: ConfigSubcommands,
}

/// Available config subcommands.
#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Write a commented starter config.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved configuration with secrets redacted.
    Show,
}

/// Builds the API client from config file and environment.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded, credentials are
/// missing, or the client fails to build.
fn build_client(dir: Option<&PathBuf>) -> Result<ErcotClient> {
    let config_path = resolve_config_path(dir).context("failed to resolve config path")?;
    let config = AppConfig::resolve(&config_path).context("failed to load config")?;
    config
        .ercot
        .client_builder()?
        .build()
        .context("failed to build API client")
}

/// Logs archive failures and writes the table.
///
/// # Errors
///
/// Returns an error if writing the CSV fails.
fn emit(dataset: &Dataset, output: Option<&PathBuf>) -> Result<()> {
    for failure in &dataset.failures {
        tracing::warn!("{failure}");
    }
    tracing::info!(
        rows = dataset.table.len(),
        route = ?dataset.route,
        failures = dataset.failures.len(),
        "Fetched dataset"
    );
    write_table(&dataset.table, output.map(PathBuf::as_path))
}

/// Runs one of the dataset subcommands.
///
/// # Errors
///
/// Returns an error if arguments are invalid, the client cannot be built,
/// the fetch fails, or output cannot be written.
#[instrument(skip_all)]
async fn run_dataset(command: &Commands, dir: Option<&PathBuf>) -> Result<()> {
    let args = match command {
        Commands::Spp(a) => &a.range,
        Commands::Lmp(a) => &a.range,
        Commands::ShadowPrices(a) => &a.range,
        Commands::Load(a) => &a.range,
        Commands::Wind(a) | Commands::Solar(a) => &a.range,
        Commands::AsPrices(a)
        | Commands::AsPlan(a)
        | Commands::DcTies(a)
        | Commands::TotalGeneration(a)
        | Commands::SystemActuals(a) => a,
        Commands::Archive(_) | Commands::Poll(_) | Commands::Token | Commands::Config(_) => {
            anyhow::bail!("not a dataset subcommand");
        }
    };
    let range = args.range()?;
    tracing::info!(
        "Date range: {} .. {}",
        range.start.format("%Y-%m-%d %H:%M"),
        range.end.format("%Y-%m-%d %H:%M"),
    );
    let client = build_client(dir)?;

    let dataset = match command {
        Commands::Spp(a) => client.get_spp(&range, a.market, &a.filter()).await,
        Commands::Lmp(a) => client.get_lmp(&range, a.market, a.location_type).await,
        Commands::AsPrices(_) => client.get_as_prices(&range).await,
        Commands::AsPlan(_) => client.get_as_plan(&range).await,
        Commands::ShadowPrices(a) => client.get_shadow_prices(&range, a.market).await,
        Commands::Load(a) => client.get_load(&range, a.grouping).await,
        Commands::Wind(a) => client.get_wind_forecast(&range, a.options()).await,
        Commands::Solar(a) => client.get_solar_forecast(&range, a.options()).await,
        Commands::DcTies(_) => client.get_dc_tie_flows(&range).await,
        Commands::TotalGeneration(_) => client.get_total_generation(&range).await,
        Commands::SystemActuals(_) => client.get_system_wide_actuals(&range).await,
        Commands::Archive(_) | Commands::Poll(_) | Commands::Token | Commands::Config(_) => {
            anyhow::bail!("not a dataset subcommand");
        }
    }
    .context("failed to fetch dataset")?;

    emit(&dataset, args.output.as_ref())
}

/// Runs the `archive list` subcommand.
///
/// # Errors
///
/// Returns an error if the listing fails or output cannot be written.
#[instrument(skip_all)]
async fn run_archive_list(args: &ArchiveListArgs, dir: Option<&PathBuf>) -> Result<()> {
    let range = args.range.range()?;
    let client = build_client(dir)?;
    let links = client
        .list_archives(&args.emil_id, &range)
        .await
        .context("failed to list archives")?;
    tracing::info!("Total: {} documents", links.len());
    write_table(&links_table(&links), args.range.output.as_deref())
}

/// Runs the `poll spp` subcommand until Ctrl+C, the iteration limit, or
/// too many consecutive errors.
///
/// # Errors
///
/// Returns an error if the client cannot be built, output cannot be
/// written, or polling gave up after repeated failures.
#[instrument(skip_all)]
async fn run_poll_spp(args: &PollSppArgs, dir: Option<&PathBuf>) -> Result<()> {
    let client = build_client(dir)?;
    let filter = LocationFilter::names(args.locations.iter().map(String::as_str));
    let market = args.market;
    let poller = Poller::new(Duration::from_secs(args.interval));
    tracing::info!(interval = ?poller.interval(), %market, "Polling settlement point prices");

    let handle = poller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping");
            handle.stop();
        }
    });

    let client = &client;
    let filter = &filter;
    let stop = poller.stop_handle();
    let mut write_error = None;
    let summary = poller
        .run(
            move || async move {
                let range = DateRange::parse("today", None)?;
                let dataset = client.get_spp(&range, market, filter).await?;
                Ok::<_, GridError>(dataset.table)
            },
            |result| match result.outcome {
                Ok(table) => {
                    tracing::info!(
                        iteration = result.iteration,
                        at = %result.timestamp.format("%H:%M:%S"),
                        rows = table.len(),
                        "Poll result"
                    );
                    if let Err(e) = write_table(&table, args.output.as_deref()) {
                        write_error = Some(e);
                        stop.stop();
                    }
                }
                Err(e) => {
                    tracing::warn!(iteration = result.iteration, "Poll failed: {e}");
                }
            },
            args.max_iterations,
        )
        .await;

    if let Some(e) = write_error {
        return Err(e);
    }
    tracing::info!(iterations = summary.iterations, reason = ?summary.reason, "Polling finished");
    if summary.reason == StopReason::TooManyErrors {
        anyhow::bail!("polling stopped after repeated failures");
    }
    Ok(())
}

/// Runs the `token` subcommand.
///
/// # Errors
///
/// Returns an error if the client cannot be built or the token exchange fails.
#[instrument(skip_all)]
async fn run_token(dir: Option<&PathBuf>) -> Result<()> {
    let client = build_client(dir)?;
    let token = client
        .auth()
        .get_token()
        .await
        .context("failed to obtain access token")?;
    tracing::info!(token_len = token.len(), "Credentials accepted");
    Ok(())
}

/// Runs the `config init` subcommand.
///
/// # Errors
///
/// Returns an error if the path cannot be resolved or the file write fails.
fn run_config_init(force: bool, dir: Option<&PathBuf>) -> Result<()> {
    let config_path = resolve_config_path(dir).context("failed to resolve config path")?;
    AppConfig::write_template(&config_path, force)?;
    tracing::info!("Wrote {}", config_path.display());
    Ok(())
}

/// Runs the `config show` subcommand.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded or serialized.
fn run_config_show(dir: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let config_path = resolve_config_path(dir).context("failed to resolve config path")?;
    let config = AppConfig::resolve(&config_path).context("failed to load config")?;
    tracing::info!("Config: {}", config_path.display());
    let rendered =
        toml::to_string_pretty(&config.redacted()).context("failed to serialize config")?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .context("failed to write to stdout")?;
    Ok(())
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if subcommand execution fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr so CSV on stdout stays clean.
    #[cfg(not(feature = "otel"))]
    {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    #[cfg(feature = "otel")]
    {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);

        let otel_layer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .and_then(|_| {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()
                    .ok()?;

                let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                    .with_simple_exporter(exporter)
                    .build();

                let tracer = opentelemetry::trace::TracerProvider::tracer(
                    &tracer_provider,
                    env!("CARGO_PKG_NAME"),
                );
                opentelemetry::global::set_tracer_provider(tracer_provider);

                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    }

    let cli = Cli::parse();
    let dir = cli.dir.as_ref();
    match &cli.command {
        Commands::Archive(archive) => match &archive.command {
            ArchiveSubcommands::List(args) => run_archive_list(args, dir).await,
        },
        Commands::Poll(poll) => match &poll.command {
            PollSubcommands::Spp(args) => run_poll_spp(args, dir).await,
        },
        Commands::Token => run_token(dir).await,
        Commands::Config(config) => match &config.command {
            ConfigSubcommands::Init { force } => run_config_init(*force, dir),
            ConfigSubcommands::Show => run_config_show(dir),
        },
        dataset => run_dataset(dataset, dir).await,
    }
}
