//! Retrying call helper used by every outbound request.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use super::auth::ErcotAuth;
use super::error::{GridError, GridResult};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Suspends the current task between attempts.
///
/// Swapped out in tests to record delays instead of waiting them out.
pub trait Sleeper: Send + Sync + Debug {
    /// Returns a future that completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Exponential backoff: `base * 2^attempt` plus jitter, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Jitter as a fraction of the exponential delay (`0.0` disables it).
    pub jitter: f64,
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor).min(self.max);
        let jitter = if self.jitter > 0.0 {
            exponential.mul_f64(self.jitter * fastrand::f64())
        } else {
            Duration::ZERO
        };
        exponential.saturating_add(jitter).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

/// Attempt budget, backoff schedule and sleep function.
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    max_retries: u32,
    /// Delay schedule.
    backoff: Backoff,
    /// Sleep implementation.
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Backoff::default(), Arc::new(TokioSleeper))
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max_retries: u32, backoff: Backoff, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            max_retries,
            backoff,
            sleeper,
        }
    }

    /// Total attempts allowed (`max_retries + 1`).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff schedule.
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Runs `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Transport errors, timeouts, 429 and 5xx are retried after a backoff
    /// delay (or the server's `Retry-After`, capped at the backoff maximum).
    /// A 401/403 is not retried and becomes [`GridError::Authentication`].
    ///
    /// # Errors
    ///
    /// - [`GridError::RetryExhausted`] wrapping the last error once every
    ///   attempt has failed with a retryable error.
    /// - [`GridError::Authentication`] on 401/403.
    /// - Any non-retryable error from `op`, unchanged.
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, mut op: F) -> GridResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GridResult<T>>,
    {
        self.run(endpoint, None, |_token: String| op()).await
    }

    /// Like [`RetryPolicy::execute`], handing `op` a bearer token from
    /// `auth` on every attempt.
    ///
    /// A 401/403 invalidates the token that attempt used and retries once
    /// without consuming budget; a repeat becomes
    /// [`GridError::Authentication`]. Concurrent requests rejected with
    /// the same token share a single re-exchange.
    ///
    /// # Errors
    ///
    /// As [`RetryPolicy::execute`], plus any token exchange error.
    pub async fn execute_authorized<T, F, Fut>(
        &self,
        endpoint: &str,
        auth: &ErcotAuth,
        op: F,
    ) -> GridResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = GridResult<T>>,
    {
        self.run(endpoint, Some(auth), op).await
    }

    async fn run<T, F, Fut>(
        &self,
        endpoint: &str,
        auth: Option<&ErcotAuth>,
        mut op: F,
    ) -> GridResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = GridResult<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut failures: u32 = 0;
        let mut reauthenticated = false;

        loop {
            let attempt = failures.saturating_add(1);
            let token = match auth {
                Some(auth) => Box::pin(auth.get_token()).await?,
                None => String::new(),
            };

            let err = match op(token.clone()).await {
                Ok(value) => {
                    tracing::debug!(endpoint, attempt, "Request succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_auth_rejection() {
                match auth {
                    Some(auth) if !reauthenticated => {
                        tracing::warn!(
                            endpoint,
                            attempt,
                            status = err.status(),
                            "Token rejected, refreshing and retrying once"
                        );
                        auth.invalidate(&token).await;
                        reauthenticated = true;
                        continue;
                    }
                    _ => {
                        return Err(GridError::Authentication {
                            message: format!("{endpoint} rejected credentials: {err}"),
                            status: err.status(),
                        });
                    }
                }
            }

            if !err.is_retryable() {
                tracing::debug!(endpoint, attempt, error = %err, "Request failed permanently");
                return Err(err);
            }

            failures = attempt;
            if failures >= max_attempts {
                tracing::warn!(endpoint, attempts = failures, error = %err, "Retries exhausted");
                return Err(GridError::RetryExhausted {
                    endpoint: String::from(endpoint),
                    attempts: failures,
                    source: Box::new(err),
                });
            }

            let delay = err.retry_after().map_or_else(
                || self.backoff.delay(failures.saturating_sub(1)),
                |after| after.min(self.backoff.max),
            );
            tracing::warn!(
                endpoint,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Request failed, will retry"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
