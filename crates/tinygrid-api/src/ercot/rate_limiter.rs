//! Rolling-window request limiter shared by every call on one client.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Published ERCOT budget (requests per minute).
pub const ERCOT_REQUESTS_PER_MINUTE: u32 = 30;

/// Length of the rolling window.
const WINDOW: Duration = Duration::from_secs(60);

/// Admits at most `max_requests` per rolling `window`.
///
/// Admission instants are kept in a log guarded by a FIFO mutex that is
/// held while a caller waits, so blocked callers are admitted in arrival
/// order as the window slides.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct RateLimiter {
    /// `None` disables limiting.
    max_requests: Option<usize>,
    /// Rolling window length.
    window: Duration,
    /// Admission instants within the current window, oldest first.
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per `window`.
    ///
    /// `max_requests == 0` is treated as disabled.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: (max_requests > 0).then_some(max_requests),
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Creates a limiter with a 60-second window.
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(usize::try_from(max_requests).unwrap_or(usize::MAX), WINDOW)
    }

    /// Creates a limiter that admits every caller immediately.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, WINDOW)
    }

    /// Whether the limiter enforces a budget.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.max_requests.is_some()
    }

    /// Waits until a request slot is free, then claims it.
    ///
    /// Never fails; a disabled limiter returns immediately.
    #[allow(clippy::arithmetic_side_effects)]
    pub async fn acquire(&self) {
        let Some(limit) = self.max_requests else {
            return;
        };

        let mut admitted = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            Self::purge(&mut admitted, now, self.window);

            if admitted.len() < limit {
                admitted.push_back(now);
                return;
            }

            if let Some(&oldest) = admitted.front() {
                let wait_until = oldest + self.window;
                let remaining = wait_until.saturating_duration_since(now);
                tracing::warn!(
                    remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    limit,
                    "Rate limit reached. Waiting..."
                );
                tokio::time::sleep_until(wait_until).await;
            }
        }
    }

    /// Slots free right now.
    pub async fn available(&self) -> usize {
        let Some(limit) = self.max_requests else {
            return usize::MAX;
        };
        let mut admitted = self.admitted.lock().await;
        Self::purge(&mut admitted, Instant::now(), self.window);
        limit.saturating_sub(admitted.len())
    }

    /// Forgets all admissions, restoring the full budget.
    pub async fn reset(&self) {
        self.admitted.lock().await.clear();
    }

    /// Drops admissions that have left the window.
    fn purge(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while admitted.front().is_some_and(|&t| t <= cutoff) {
            admitted.pop_front();
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(ERCOT_REQUESTS_PER_MINUTE)
    }
}
