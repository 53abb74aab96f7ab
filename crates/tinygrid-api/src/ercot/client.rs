//! `ErcotClient` - ERCOT public-reports API client implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use super::api::LocalErcotApi;
use super::archive::ArchiveFetch;
use super::auth::{
    AUTH_URL, CLIENT_ID, Credentials, DEFAULT_REFRESH_MARGIN, DEFAULT_TOKEN_TTL, ErcotAuth,
};
use super::constants::{HISTORICAL_THRESHOLD_DAYS, MAX_BULK_DOWNLOAD_FILES, PUBLIC_API_BASE_URL};
use super::dates::DateRange;
use super::error::{GridError, GridResult};
use super::rate_limiter::{ERCOT_REQUESTS_PER_MINUTE, RateLimiter};
use super::report::Report;
use super::retry::{Backoff, DEFAULT_MAX_RETRIES, RetryPolicy, Sleeper, TokioSleeper};
use super::routing::Router;
use crate::table::Table;

/// Header carrying the API portal subscription key.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Default HTTP timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default records per page.
const DEFAULT_PAGE_SIZE: u32 = 10_000;

/// Default bound on in-flight page and archive-chunk requests.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default archive chunk length in days.
const DEFAULT_ARCHIVE_CHUNK_DAYS: u32 = 31;

/// ERCOT public-reports API client.
///
/// Composes the authenticator, retry policy, rate limiter and router.
/// Build once with [`ErcotClient::builder`] and pass by reference.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct ErcotClient {
    /// HTTP client (reqwest, gzip enabled).
    pub(super) http_client: Client,
    /// Public-reports base URL.
    pub(super) base_url: Url,
    /// Token authenticator.
    pub(super) auth: ErcotAuth,
    /// Retry policy shared by all requests.
    pub(super) retry: RetryPolicy,
    /// Client-side request budget.
    pub(super) rate_limiter: RateLimiter,
    /// Records per page.
    pub(super) page_size: u32,
    /// In-flight page / chunk bound.
    pub(super) max_concurrent: usize,
    /// Documents per bulk download request.
    pub(super) archive_batch_size: usize,
    /// Archive chunk length in days.
    pub(super) archive_chunk_days: u32,
    /// Live/archive cutover.
    pub(super) router: Router,
    /// Return empty datasets instead of errors.
    pub(super) soft_errors: bool,
}

/// Builder for `ErcotClient`.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct ErcotClientBuilder {
    credentials: Option<Credentials>,
    base_url: Option<Url>,
    auth_url: Option<Url>,
    client_id: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_min_wait: Option<Duration>,
    retry_max_wait: Option<Duration>,
    page_size: Option<u32>,
    max_concurrent_requests: Option<usize>,
    requests_per_minute: Option<u32>,
    rate_limit_disabled: bool,
    historical_threshold_days: Option<u32>,
    token_ttl: Option<Duration>,
    token_refresh_margin: Option<Duration>,
    archive_batch_size: Option<usize>,
    archive_chunk_days: Option<u32>,
    soft_errors: bool,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl ErcotClientBuilder {
    /// Creates a new builder.
    const fn new() -> Self {
        Self {
            credentials: None,
            base_url: None,
            auth_url: None,
            client_id: None,
            timeout: None,
            max_retries: None,
            retry_min_wait: None,
            retry_max_wait: None,
            page_size: None,
            max_concurrent_requests: None,
            requests_per_minute: None,
            rate_limit_disabled: false,
            historical_threshold_days: None,
            token_ttl: None,
            token_refresh_margin: None,
            archive_batch_size: None,
            archive_chunk_days: None,
            soft_errors: false,
            sleeper: None,
        }
    }

    /// Sets the account credentials (required).
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Overrides the public-reports base URL (for wiremock in tests).
    #[must_use]
    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Overrides the token endpoint.
    #[must_use]
    pub fn auth_url(mut self, url: Url) -> Self {
        self.auth_url = Some(url);
        self
    }

    /// Overrides the OAuth client ID.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the per-request timeout (default: 30s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets retries after the first attempt (default: 3).
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the first backoff delay (default: 1s).
    #[must_use]
    pub const fn retry_min_wait(mut self, wait: Duration) -> Self {
        self.retry_min_wait = Some(wait);
        self
    }

    /// Sets the backoff cap (default: 60s).
    #[must_use]
    pub const fn retry_max_wait(mut self, wait: Duration) -> Self {
        self.retry_max_wait = Some(wait);
        self
    }

    /// Sets records per page (default: 10,000).
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the in-flight request bound for pages and archive chunks
    /// (default: 5).
    #[must_use]
    pub const fn max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = Some(n);
        self
    }

    /// Sets the client-side request budget (default: 30/min).
    #[must_use]
    pub const fn requests_per_minute(mut self, n: u32) -> Self {
        self.requests_per_minute = Some(n);
        self
    }

    /// Disables client-side rate limiting.
    #[must_use]
    pub const fn disable_rate_limit(mut self) -> Self {
        self.rate_limit_disabled = true;
        self
    }

    /// Sets the live/archive cutover age in days (default: 90).
    #[must_use]
    pub const fn historical_threshold_days(mut self, days: u32) -> Self {
        self.historical_threshold_days = Some(days);
        self
    }

    /// Sets the token lifetime assumed when the provider omits one
    /// (default: 1h).
    #[must_use]
    pub const fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }

    /// Sets how long before expiry a token is replaced (default: 5min).
    #[must_use]
    pub const fn token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = Some(margin);
        self
    }

    /// Sets documents per bulk download (default and maximum: 1,000).
    #[must_use]
    pub const fn archive_batch_size(mut self, size: usize) -> Self {
        self.archive_batch_size = Some(size);
        self
    }

    /// Sets archive chunk length in days (default: 31).
    #[must_use]
    pub const fn archive_chunk_days(mut self, days: u32) -> Self {
        self.archive_chunk_days = Some(days);
        self
    }

    /// Makes dataset accessors return empty results instead of errors.
    #[must_use]
    pub const fn soft_errors(mut self, soft: bool) -> Self {
        self.soft_errors = soft;
        self
    }

    /// Replaces the retry sleep function.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// - `credentials` is not set.
    /// - `reqwest::Client` build fails.
    pub fn build(self) -> GridResult<ErcotClient> {
        let credentials = self
            .credentials
            .ok_or_else(|| GridError::invalid("credentials are required"))?;

        let base_url = match self.base_url {
            Some(url) => url,
            None => parse_url(PUBLIC_API_BASE_URL)?,
        };
        let auth_url = match self.auth_url {
            Some(url) => url,
            None => parse_url(AUTH_URL)?,
        };

        let http_client = Client::builder()
            .user_agent(concat!("tinygrid/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .gzip(true)
            .build()
            .map_err(|e| GridError::invalid(format!("failed to build HTTP client: {e}")))?;

        let defaults = Backoff::default();
        let backoff = Backoff {
            base: self.retry_min_wait.unwrap_or(defaults.base),
            max: self.retry_max_wait.unwrap_or(defaults.max),
            jitter: defaults.jitter,
        };
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let retry = RetryPolicy::new(
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            backoff,
            sleeper,
        );

        let auth = ErcotAuth::new(
            http_client.clone(),
            credentials,
            auth_url,
            self.client_id.unwrap_or_else(|| String::from(CLIENT_ID)),
            self.token_ttl.unwrap_or(DEFAULT_TOKEN_TTL),
            self.token_refresh_margin.unwrap_or(DEFAULT_REFRESH_MARGIN),
            retry.clone(),
        );

        let rate_limiter = if self.rate_limit_disabled {
            RateLimiter::disabled()
        } else {
            RateLimiter::per_minute(
                self.requests_per_minute
                    .unwrap_or(ERCOT_REQUESTS_PER_MINUTE),
            )
        };

        Ok(ErcotClient {
            http_client,
            base_url,
            auth,
            retry,
            rate_limiter,
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
            max_concurrent: self
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT)
                .max(1),
            archive_batch_size: self
                .archive_batch_size
                .unwrap_or(MAX_BULK_DOWNLOAD_FILES)
                .clamp(1, MAX_BULK_DOWNLOAD_FILES),
            archive_chunk_days: self
                .archive_chunk_days
                .unwrap_or(DEFAULT_ARCHIVE_CHUNK_DAYS)
                .max(1),
            router: Router::new(
                self.historical_threshold_days
                    .unwrap_or(HISTORICAL_THRESHOLD_DAYS),
            ),
            soft_errors: self.soft_errors,
        })
    }
}

fn parse_url(raw: &str) -> GridResult<Url> {
    Url::parse(raw).map_err(|e| GridError::invalid(format!("invalid URL {raw:?}: {e}")))
}

/// Paginated report envelope.
#[derive(Debug, Deserialize)]
struct ReportPage {
    #[serde(rename = "_meta", default)]
    meta: Option<PageMeta>,
    #[serde(default)]
    fields: Vec<FieldDef>,
    #[serde(default)]
    data: Option<PageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FieldDef {
    name: Option<String>,
    label: Option<String>,
}

/// `data` is either a bare row list or wrapped in `records`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageData {
    Rows(Vec<Value>),
    Records { records: Vec<Value> },
}

impl ReportPage {
    fn total_pages(&self) -> u32 {
        self.meta
            .as_ref()
            .and_then(|m| m.total_pages)
            .unwrap_or(1)
            .max(1)
    }

    /// Column names from `fields`, preferring `label` over `name`.
    fn columns(&self) -> Option<Vec<String>> {
        if self.fields.is_empty() {
            return None;
        }
        Some(
            self.fields
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    f.label
                        .clone()
                        .or_else(|| f.name.clone())
                        .unwrap_or_else(|| format!("col_{i}"))
                })
                .collect(),
        )
    }

    fn into_table(self) -> Table {
        let columns = self.columns();
        let rows = match self.data {
            Some(PageData::Rows(rows) | PageData::Records { records: rows }) => rows,
            None => Vec::new(),
        };

        if rows.iter().all(Value::is_object) && !rows.is_empty() {
            let records: Vec<_> = rows
                .into_iter()
                .filter_map(|r| match r {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect();
            return Table::from_records(columns, &records);
        }

        let positional: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|r| match r {
                Value::Array(cells) => cells,
                other => vec![other],
            })
            .collect();
        let columns = columns.unwrap_or_else(|| {
            let width = positional.iter().map(Vec::len).max().unwrap_or(0);
            (0..width).map(|i| format!("col_{i}")).collect()
        });
        Table::from_rows(columns, positional)
    }
}

impl ErcotClient {
    /// Creates a new builder.
    #[must_use]
    pub const fn builder() -> ErcotClientBuilder {
        ErcotClientBuilder::new()
    }

    /// Token authenticator.
    #[must_use]
    pub const fn auth(&self) -> &ErcotAuth {
        &self.auth
    }

    /// Live/archive router.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Whether dataset accessors swallow errors.
    #[must_use]
    pub const fn soft_errors(&self) -> bool {
        self.soft_errors
    }

    /// Resolves an endpoint path against the base URL.
    pub(super) fn endpoint_url(&self, path: &str) -> GridResult<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        parse_url(&joined)
    }

    /// Sends one logical request through rate limiter, auth and retry.
    ///
    /// `build` creates the request afresh for every attempt; `read`
    /// consumes a 2xx response. Body-read failures are retried like any
    /// other transport error.
    pub(super) async fn send<T, B, R, Fut>(&self, endpoint: &str, build: B, read: R) -> GridResult<T>
    where
        B: Fn() -> RequestBuilder,
        R: Fn(Response) -> Fut,
        Fut: Future<Output = GridResult<T>>,
    {
        let (build, read) = (&build, &read);
        self.retry
            .execute_authorized(endpoint, &self.auth, |token| async move {
                self.rate_limiter.acquire().await;
                let response = build()
                    .bearer_auth(token)
                    .header(SUBSCRIPTION_KEY_HEADER, self.auth.subscription_key())
                    .send()
                    .await
                    .map_err(|e| GridError::from_reqwest(endpoint, e))?;
                let response = check_status(endpoint, response).await?;
                read(response).await
            })
            .await
    }

    /// GETs `url` and decodes the JSON body.
    pub(super) async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        url: &Url,
        query: &[(&str, String)],
    ) -> GridResult<T> {
        self.send(
            endpoint,
            || self.http_client.get(url.clone()).query(query),
            |response| read_json(endpoint, response),
        )
        .await
    }

    /// Fetches every page of a report endpoint.
    ///
    /// Page 1 reports `_meta.totalPages`; the remaining pages are fetched
    /// with at most `max_concurrent_requests` in flight and concatenated
    /// in page order.
    ///
    /// # Errors
    ///
    /// Returns the first page error after retries.
    #[instrument(skip_all, fields(path))]
    pub async fn fetch_endpoint(&self, path: &str, params: &[(&str, String)]) -> GridResult<Table> {
        let url = self.endpoint_url(path)?;

        let first = self.fetch_page(path, &url, params, 1).await?;
        let total_pages = first.total_pages();
        tracing::debug!(path, total_pages, "Fetched first page");

        let mut tables = vec![first.into_table()];
        if total_pages > 1 {
            let rest: Vec<Table> = stream::iter(2..=total_pages)
                .map(|page| self.fetch_page(path, &url, params, page))
                .buffered(self.max_concurrent)
                .map_ok(ReportPage::into_table)
                .try_collect()
                .await?;
            tables.extend(rest);
        }

        let table = Table::concat(tables);
        tracing::info!(path, pages = total_pages, rows = table.len(), "Fetched report");
        Ok(table)
    }

    async fn fetch_page(
        &self,
        path: &str,
        url: &Url,
        params: &[(&str, String)],
        page: u32,
    ) -> GridResult<ReportPage> {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("page", page.to_string()));
        query.push(("size", self.page_size.to_string()));
        tracing::debug!(path, page, "Requesting page");
        self.get_json(path, url, &query).await
    }

    /// Fetches `report` for `range` from the live REST API.
    ///
    /// # Errors
    ///
    /// - [`GridError::InvalidInput`] for archive-only reports.
    /// - Any request error after retries.
    pub async fn fetch_live(&self, report: Report, range: &DateRange) -> GridResult<Table> {
        if !report.live_available() {
            return Err(GridError::invalid(format!(
                "{report} is only available from the archive"
            )));
        }
        let params = report.date_params().query(range);
        self.fetch_endpoint(report.path(), &params).await
    }
}

impl LocalErcotApi for ErcotClient {
    #[instrument(skip_all)]
    async fn fetch_live(&self, report: Report, range: &DateRange) -> GridResult<Table> {
        Self::fetch_live(self, report, range).await
    }

    #[instrument(skip_all)]
    async fn fetch_archive(&self, report: Report, range: &DateRange) -> GridResult<ArchiveFetch> {
        Self::fetch_archive(self, report, range).await
    }
}

/// Maps non-2xx responses to typed errors.
async fn check_status(endpoint: &str, response: Response) -> GridResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(GridError::RateLimited {
            endpoint: String::from(endpoint),
            retry_after,
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(GridError::Api {
        endpoint: String::from(endpoint),
        status: status.as_u16(),
        body,
    })
}

/// Reads and decodes a JSON body.
async fn read_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> GridResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GridError::from_reqwest(endpoint, e))?;
    serde_json::from_slice(&bytes).map_err(|e| GridError::decode(endpoint, e))
}
