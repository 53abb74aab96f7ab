//! ERCOT B2C password-grant authenticator with a cached bearer token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;
use url::Url;

use super::error::{GridError, GridResult};
use super::retry::RetryPolicy;

/// Token endpoint of the ERCOT public API identity provider.
pub const AUTH_URL: &str = "https://ercotb2c.b2clogin.com/ercotb2c.onmicrosoft.com/B2C_1_PUBAPI-ROPC-FLOW/oauth2/v2.0/token";

/// Public client ID registered for the ERCOT API explorer.
pub const CLIENT_ID: &str = "fec253ea-0d06-4272-a5e6-b478baeecd70";

/// Token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Tokens are replaced this long before they expire.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Label used for auth requests in logs and errors.
const ENDPOINT: &str = "auth/token";

/// ERCOT API account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account e-mail.
    pub username: String,
    /// Account password.
    pub password: String,
    /// API portal subscription key (`Ocp-Apim-Subscription-Key`).
    pub subscription_key: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        subscription_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            subscription_key: subscription_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("subscription_key", &"<redacted>")
            .finish()
    }
}

/// A bearer token and the window in which it may be used.
#[derive(Clone)]
struct CachedToken {
    value: String,
    issued_at: Instant,
    ttl: Duration,
}

impl CachedToken {
    /// Usable while `now < issued_at + ttl - margin`.
    fn is_usable(&self, now: Instant, margin: Duration) -> bool {
        let lifetime = self.ttl.saturating_sub(margin);
        now.saturating_duration_since(self.issued_at) < lifetime
    }
}

/// Exchanges credentials for bearer tokens and caches them.
///
/// The check-and-refresh sequence runs under a single mutex, so concurrent
/// callers see at most one exchange per expiry.
pub struct ErcotAuth {
    http_client: Client,
    credentials: Credentials,
    auth_url: Url,
    client_id: String,
    ttl: Duration,
    refresh_margin: Duration,
    retry: RetryPolicy,
    cache: Mutex<Option<CachedToken>>,
    exchanges: AtomicU64,
}

impl fmt::Debug for ErcotAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErcotAuth")
            .field("credentials", &self.credentials)
            .field("auth_url", &self.auth_url.as_str())
            .field("ttl", &self.ttl)
            .field("refresh_margin", &self.refresh_margin)
            .field("exchanges", &self.exchange_count())
            .finish_non_exhaustive()
    }
}

impl ErcotAuth {
    /// Creates an authenticator; no network traffic happens until
    /// [`ErcotAuth::get_token`] is called.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http_client: Client,
        credentials: Credentials,
        auth_url: Url,
        client_id: impl Into<String>,
        ttl: Duration,
        refresh_margin: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http_client,
            credentials,
            auth_url,
            client_id: client_id.into(),
            ttl,
            refresh_margin,
            retry,
            cache: Mutex::new(None),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Subscription key sent with every API request.
    #[must_use]
    pub fn subscription_key(&self) -> &str {
        &self.credentials.subscription_key
    }

    /// Number of credential exchanges performed so far.
    #[must_use]
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Returns a usable bearer token, exchanging credentials if the cached
    /// one is missing or inside its refresh margin.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Authentication`] when the identity provider
    /// rejects the credentials, returns no token, or stays unreachable
    /// after retries.
    #[instrument(skip_all)]
    pub async fn get_token(&self) -> GridResult<String> {
        let mut cache = self.cache.lock().await;

        if let Some(token) = cache.as_ref()
            && token.is_usable(Instant::now(), self.refresh_margin)
        {
            return Ok(token.value.clone());
        }

        tracing::debug!(username = %self.credentials.username, "Requesting ERCOT token");
        let token = self
            .retry
            .execute(ENDPOINT, || self.exchange())
            .await
            .map_err(into_auth_error)?;
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        tracing::info!(ttl_secs = token.ttl.as_secs(), "ERCOT token refreshed");

        let value = token.value.clone();
        *cache = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next call re-authenticates.
    pub async fn clear_cache(&self) {
        *self.cache.lock().await = None;
    }

    /// Drops the cached token only if it is still `rejected`.
    ///
    /// Requests that were rejected with the same token all call this; the
    /// first clears the cache and the rest find the replacement already in
    /// place, so they share a single re-exchange.
    pub async fn invalidate(&self, rejected: &str) {
        let mut cache = self.cache.lock().await;
        if cache.as_ref().is_some_and(|token| token.value == rejected) {
            tracing::debug!("Invalidating rejected ERCOT token");
            *cache = None;
        }
    }

    /// Performs one password-grant exchange.
    ///
    /// A 4xx other than 429 means the credentials were refused and is
    /// final; 429 and 5xx are left for the retry policy.
    async fn exchange(&self) -> GridResult<CachedToken> {
        let scope = format!("openid {} offline_access", self.client_id);
        let query = [
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("grant_type", "password"),
            ("scope", scope.as_str()),
            ("client_id", self.client_id.as_str()),
            ("response_type", "id_token"),
        ];

        let response = self
            .http_client
            .post(self.auth_url.clone())
            .query(&query)
            .send()
            .await
            .map_err(|e| GridError::from_reqwest(ENDPOINT, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GridError::RateLimited {
                endpoint: String::from(ENDPOINT),
                retry_after: None,
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), %body, "Token request rejected");
            return Err(GridError::Authentication {
                message: format!("ERCOT authentication failed with status {}", status.as_u16()),
                status: Some(status.as_u16()),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GridError::Api {
                endpoint: String::from(ENDPOINT),
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| GridError::from_reqwest(ENDPOINT, e))?;
        self.parse_token(&body, Instant::now())
    }

    /// Extracts the token and its lifetime from the provider's response.
    fn parse_token(&self, body: &str, issued_at: Instant) -> GridResult<CachedToken> {
        let json: Value = serde_json::from_str(body).map_err(|_| GridError::Authentication {
            message: String::from("Failed to parse authentication response as JSON"),
            status: None,
        })?;

        let value = ["access_token", "id_token"]
            .iter()
            .find_map(|key| json.get(key).and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GridError::Authentication {
                message: String::from("No access token in ERCOT authentication response"),
                status: None,
            })?;

        let ttl = json
            .get("expires_in")
            .and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            })
            .map_or(self.ttl, Duration::from_secs);

        Ok(CachedToken {
            value: String::from(value),
            issued_at,
            ttl,
        })
    }
}

/// Folds every exchange failure into [`GridError::Authentication`].
fn into_auth_error(err: GridError) -> GridError {
    let root = match err {
        GridError::RetryExhausted { source, .. } => *source,
        other => other,
    };
    match root {
        GridError::Authentication { .. } => root,
        GridError::Api { status, .. } => GridError::Authentication {
            message: format!("ERCOT authentication failed with status {status}"),
            status: Some(status),
        },
        GridError::RateLimited { .. } => GridError::Authentication {
            message: String::from("ERCOT authentication failed with status 429"),
            status: Some(429),
        },
        GridError::Timeout { .. } => GridError::Authentication {
            message: String::from("ERCOT authentication request timed out"),
            status: None,
        },
        other => GridError::Authentication {
            message: format!("ERCOT authentication request failed: {other}"),
            status: None,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::ercot::retry::tests::RecordingSleeper;
    use crate::ercot::retry::{Backoff, Sleeper};

    pub(crate) fn test_auth(server: &MockServer, ttl: Duration) -> ErcotAuth {
        let sleeper: Arc<dyn Sleeper> = Arc::new(RecordingSleeper::default());
        ErcotAuth::new(
            Client::new(),
            Credentials::new("user@example.com", "hunter2", "sub-key"),
            format!("{}/token", server.uri()).parse().unwrap(),
            CLIENT_ID,
            ttl,
            DEFAULT_REFRESH_MARGIN,
            RetryPolicy::new(2, Backoff::default(), sleeper),
        )
    }

    pub(crate) async fn mount_token(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": token })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_token_sends_password_grant() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(query_param("username", "user@example.com"))
            .and(query_param("password", "hunter2"))
            .and(query_param("grant_type", "password"))
            .and(query_param("client_id", CLIENT_ID))
            .and(query_param("response_type", "id_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "abc", "expires_in": "3600" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let token = auth.get_token().await.unwrap();

        // Assert
        assert_eq!(token, "abc");
        assert_eq!(auth.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_token_is_reused_within_window() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id_token": "id-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let first = auth.get_token().await.unwrap();
        let second = auth.get_token().await.unwrap();

        // Assert
        assert_eq!(first, "id-1");
        assert_eq!(second, "id-1");
        assert_eq!(auth.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "shared" }))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let (a, b, c) = tokio::join!(auth.get_token(), auth.get_token(), auth.get_token());

        // Assert
        assert_eq!(a.unwrap(), "shared");
        assert_eq!(b.unwrap(), "shared");
        assert_eq!(c.unwrap(), "shared");
        assert_eq!(auth.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        // Arrange: ttl equal to the margin leaves no usable window
        let server = MockServer::start().await;
        mount_token(&server, "short").await;
        let auth = test_auth(&server, DEFAULT_REFRESH_MARGIN);

        // Act
        auth.get_token().await.unwrap();
        auth.get_token().await.unwrap();

        // Assert
        assert_eq!(auth.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_exchange() {
        // Arrange
        let server = MockServer::start().await;
        mount_token(&server, "tok").await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);
        auth.get_token().await.unwrap();

        // Act
        auth.clear_cache().await;
        auth.get_token().await.unwrap();

        // Assert
        assert_eq!(auth.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .expect(1)
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let err = auth.get_token().await.unwrap_err();

        // Assert
        assert!(matches!(err, GridError::Authentication { status: Some(401), .. }));
        assert!(err.to_string().contains("failed with status 401"));
    }

    #[tokio::test]
    async fn test_forbidden_credentials_are_not_retried() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(403).set_body_string("account locked"))
            .expect(1)
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let err = auth.get_token().await.unwrap_err();

        // Assert
        assert!(matches!(err, GridError::Authentication { status: Some(403), .. }));
        assert_eq!(err.to_string(), "ERCOT authentication failed with status 403");
        assert_eq!(auth.exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_throttled_exchange_is_retried() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_token(&server, "after-throttle").await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let token = auth.get_token().await.unwrap();

        // Assert
        assert_eq!(token, "after-throttle");
        assert_eq!(auth.exchange_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_ignores_replaced_token() {
        // Arrange
        let server = MockServer::start().await;
        mount_token(&server, "current").await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);
        auth.get_token().await.unwrap();

        // Act
        auth.invalidate("previous").await;
        auth.get_token().await.unwrap();
        auth.invalidate("current").await;
        auth.get_token().await.unwrap();

        // Assert
        assert_eq!(auth.exchange_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_token_field() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token_type": "Bearer" })),
            )
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let err = auth.get_token().await.unwrap_err();

        // Assert
        assert!(err.to_string().contains("No access token"));
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let err = auth.get_token().await.unwrap_err();

        // Assert
        assert!(err.to_string().contains("Failed to parse authentication response"));
    }

    #[tokio::test]
    async fn test_server_errors_retried_then_reported_as_auth_failure() {
        // Arrange: 2 retries => 3 attempts
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        let auth = test_auth(&server, DEFAULT_TOKEN_TTL);

        // Act
        let err = auth.get_token().await.unwrap_err();

        // Assert
        assert!(matches!(err, GridError::Authentication { status: Some(503), .. }));
        assert_eq!(auth.exchange_count(), 0);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        // Arrange
        let creds = Credentials::new("user", "secret-password", "secret-key");

        // Act
        let debug = format!("{creds:?}");

        // Assert
        assert!(!debug.contains("secret-password"));
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("user"));
    }
}
