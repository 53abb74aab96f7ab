//! Repeated fetching on a fixed interval with error backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;

use super::dates::ERCOT_TIMEZONE;
use super::error::GridResult;
use super::retry::{Sleeper, TokioSleeper};
use crate::table::Table;

/// Shortest allowed poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Consecutive failures before the poller gives up.
pub const DEFAULT_MAX_ERRORS: u32 = 5;

/// One iteration's outcome, handed to the callback.
#[derive(Debug)]
pub struct PollResult {
    /// Zero-based iteration number.
    pub iteration: u64,
    /// When the fetch started, in Central time.
    pub timestamp: DateTime<Tz>,
    /// Fetched rows or the error.
    pub outcome: GridResult<Table>,
}

/// Why [`Poller::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The iteration budget was used up.
    MaxIterations,
    /// A [`StopHandle`] was triggered.
    Stopped,
    /// `max_errors` consecutive fetches failed.
    TooManyErrors,
}

/// Summary returned by [`Poller::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Fetches performed.
    pub iterations: u64,
    /// Why polling ended.
    pub reason: StopReason,
}

/// Stops a running [`Poller`] from another task or from its callback.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    /// Requests a stop. A fetch in flight is allowed to finish.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// Calls a fetch function every `interval`, backing off on errors.
#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    max_errors: u32,
    backoff_factor: f64,
    max_backoff: Duration,
    sleeper: Arc<dyn Sleeper>,
    stop: Arc<watch::Sender<bool>>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Poller {
    /// Poller with the given interval, clamped to at least 2 seconds.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            max_errors: DEFAULT_MAX_ERRORS,
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(300),
            sleeper: Arc::new(TokioSleeper),
            stop: Arc::new(stop),
        }
    }

    /// Sets consecutive failures tolerated (default: 5).
    #[must_use]
    pub const fn max_errors(mut self, n: u32) -> Self {
        self.max_errors = n;
        self
    }

    /// Sets the backoff multiplier (default: 2.0).
    #[must_use]
    pub const fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the backoff cap (default: 300s).
    #[must_use]
    pub const fn max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Replaces the wait function.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Effective interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Handle that stops [`Poller::run`].
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Polls until `max_iterations` fetches, a stop request, or
    /// `max_errors` consecutive failures.
    ///
    /// Every outcome, failures included, goes to `on_result`. After a
    /// failure the extra wait grows as `backoff * factor + interval`,
    /// capped at `max_backoff`; a success resets it. A stop request
    /// interrupts the wait between fetches but never a fetch in flight.
    pub async fn run<F, Fut, C>(
        &self,
        mut fetch: F,
        mut on_result: C,
        max_iterations: Option<u64>,
    ) -> PollSummary
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GridResult<Table>>,
        C: FnMut(PollResult),
    {
        let mut stop = self.stop.subscribe();
        let mut iterations: u64 = 0;
        let mut errors: u32 = 0;
        let mut backoff = Duration::ZERO;
        let summary = |iterations, reason| PollSummary { iterations, reason };

        loop {
            if *stop.borrow() {
                return summary(iterations, StopReason::Stopped);
            }
            if max_iterations.is_some_and(|max| iterations >= max) {
                return summary(iterations, StopReason::MaxIterations);
            }

            let timestamp = Utc::now().with_timezone(&ERCOT_TIMEZONE);
            let outcome = fetch().await;
            let failed = match &outcome {
                Ok(table) => {
                    tracing::debug!(iteration = iterations, rows = table.len(), "Poll succeeded");
                    false
                }
                Err(e) => {
                    tracing::warn!(iteration = iterations, error = %e, "Poll failed");
                    true
                }
            };
            on_result(PollResult {
                iteration: iterations,
                timestamp,
                outcome,
            });
            iterations = iterations.saturating_add(1);

            if failed {
                errors = errors.saturating_add(1);
                backoff = self.next_backoff(backoff);
                if errors >= self.max_errors {
                    tracing::error!(errors, "Stopping poller after consecutive errors");
                    return summary(iterations, StopReason::TooManyErrors);
                }
            } else {
                errors = 0;
                backoff = Duration::ZERO;
            }

            if max_iterations.is_some_and(|max| iterations >= max) {
                return summary(iterations, StopReason::MaxIterations);
            }

            let wait = self.interval.saturating_add(backoff);
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => {
                    return summary(iterations, StopReason::Stopped);
                }
                () = self.sleeper.sleep(wait) => {}
            }
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        let secs = current
            .as_secs_f64()
            .mul_add(self.backoff_factor, self.interval.as_secs_f64());
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
