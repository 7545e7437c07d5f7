//! Reconnect delay policy and per-manager retry bookkeeping.
//!
//! The delay for an automatic reconnect is
//!
//! ```text
//! delay = base + jitter + min(backoff_cap, attempt * backoff_step)
//! ```
//!
//! with `jitter` drawn uniformly from `[0, jitter_ceiling)`.

use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

/// Default upper bound (exclusive) of the random jitter.
pub const DEFAULT_JITTER_CEILING: Duration = Duration::from_millis(250);

/// Default backoff added per previous attempt.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(300);

/// Default cap on the backoff component.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(8000);

/// Parameters of the linear-capped backoff with additive jitter.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_client::reconnect::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::default();
/// assert_eq!(policy.backoff(0), Duration::ZERO);
/// assert_eq!(policy.backoff(2), Duration::from_millis(600));
/// assert_eq!(policy.backoff(1000), Duration::from_millis(8000));
///
/// let delay = policy.delay(Duration::from_millis(1500), 1, &mut rand::thread_rng());
/// assert!(delay >= Duration::from_millis(1800));
/// assert!(delay < Duration::from_millis(2050));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Exclusive upper bound of the uniform jitter. Zero disables jitter.
    pub jitter_ceiling: Duration,
    /// Backoff added for each previous attempt.
    pub backoff_step: Duration,
    /// Maximum backoff component.
    pub backoff_cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            jitter_ceiling: DEFAULT_JITTER_CEILING,
            backoff_step: DEFAULT_BACKOFF_STEP,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl ReconnectPolicy {
    /// Set the jitter ceiling.
    #[must_use]
    pub fn with_jitter_ceiling(mut self, ceiling: Duration) -> Self {
        self.jitter_ceiling = ceiling;
        self
    }

    /// Set the per-attempt backoff step.
    #[must_use]
    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// Set the backoff cap.
    #[must_use]
    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    /// The deterministic backoff component for `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step
            .checked_mul(attempt)
            .map_or(self.backoff_cap, |ramp| ramp.min(self.backoff_cap))
    }

    /// Draw a jitter value in `[0, jitter_ceiling)`.
    pub fn jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.jitter_ceiling.is_zero() {
            return Duration::ZERO;
        }
        rng.gen_range(Duration::ZERO..self.jitter_ceiling)
    }

    /// The full delay before reconnect attempt `attempt`.
    pub fn delay<R: Rng + ?Sized>(&self, base: Duration, attempt: u32, rng: &mut R) -> Duration {
        base.saturating_add(self.jitter(rng))
            .saturating_add(self.backoff(attempt))
    }

    /// Largest delay [`delay`](Self::delay) can return for `attempt`.
    pub fn max_delay(&self, base: Duration, attempt: u32) -> Duration {
        base.saturating_add(self.jitter_ceiling)
            .saturating_add(self.backoff(attempt))
    }
}

/// A scheduled reconnect that has not fired yet.
#[derive(Debug)]
pub(crate) struct PendingReconnect {
    /// Identifies the timer so a stale wake-up can recognise itself.
    pub(crate) token: u64,
    pub(crate) delay: Duration,
    pub(crate) handle: JoinHandle<()>,
}

/// Retry bookkeeping owned by the connection manager.
#[derive(Debug, Default)]
pub(crate) struct ReconnectState {
    pub(crate) attempt_count: u32,
    pub(crate) pending: Option<PendingReconnect>,
    pub(crate) manual_close_requested: bool,
}

impl ReconnectState {
    /// Abort and forget the pending timer, if any.
    pub(crate) fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel the pending timer and return to `{0, none, false}`.
    pub(crate) fn reset(&mut self) {
        self.cancel_pending();
        self.attempt_count = 0;
        self.manual_close_requested = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const BASE: Duration = Duration::from_millis(1500);

    #[test]
    fn backoff_ramps_linearly_then_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(300));
        assert_eq!(policy.backoff(2), Duration::from_millis(600));
        assert_eq!(policy.backoff(26), Duration::from_millis(7800));
        assert_eq!(policy.backoff(27), Duration::from_millis(8000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(8000));
    }

    #[test]
    fn delay_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..40 {
            for _ in 0..50 {
                let delay = policy.delay(BASE, attempt, &mut rng);
                let floor = BASE + policy.backoff(attempt);
                assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
                assert!(delay < policy.max_delay(BASE, attempt));
            }
        }
    }

    #[test]
    fn jitter_covers_its_range() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<Duration> = (0..500).map(|_| policy.jitter(&mut rng)).collect();
        assert!(samples.iter().all(|j| *j < DEFAULT_JITTER_CEILING));
        assert!(samples.iter().any(|j| *j < Duration::from_millis(50)));
        assert!(samples.iter().any(|j| *j > Duration::from_millis(200)));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let policy = ReconnectPolicy::default().with_jitter_ceiling(Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<Duration> = (0..3).map(|a| policy.delay(BASE, a, &mut rng)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1500),
                Duration::from_millis(1800),
                Duration::from_millis(2100),
            ]
        );
    }

    #[test]
    fn state_reset_clears_everything() {
        let mut state = ReconnectState {
            attempt_count: 5,
            pending: None,
            manual_close_requested: true,
        };
        state.reset();
        assert_eq!(state.attempt_count, 0);
        assert!(state.pending.is_none());
        assert!(!state.manual_close_requested);
        assert!(!state.cancel_pending());
    }

    #[tokio::test]
    async fn cancel_pending_aborts_timer() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let mut state = ReconnectState {
            pending: Some(PendingReconnect {
                token: 1,
                delay: Duration::from_secs(3600),
                handle,
            }),
            ..Default::default()
        };
        assert!(state.cancel_pending());
        assert!(state.pending.is_none());
    }
}
