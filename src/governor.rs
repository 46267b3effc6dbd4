//! Timeout, retry and cooldown policy for network calls.
//!
//! # Retry Strategy
//!
//! - Every attempt runs under a per-call deadline (`tokio::time::timeout`), so a
//!   stalled socket is abandoned without touching the rest of the process
//! - Only transient failures are retried (see [`FailureKind::is_transient`])
//! - Linear backoff between attempts:
//!
//! ```text
//! delay = attempt * base_delay
//! ```
//!
//! [`FailureStreak`] is the cross-cycle half of the policy: the caller records
//! the outcome of each cycle and asks it how long to wait before the next one.

use crate::config::Settings;
use crate::error::FailureKind;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, instrument, warn};

/// Wraps fallible async calls with a deadline and bounded, linearly backed-off retries.
#[derive(Clone)]
pub struct Governor {
    /// Retries after the first attempt; `0` means a single attempt.
    max_retries: usize,
    /// Unit of the linear backoff.
    base_delay: Duration,
    /// Deadline applied to every individual attempt.
    per_call_timeout: Duration,
}

impl Governor {
    pub fn new(max_retries: usize, base_delay: Duration, per_call_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            per_call_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_millis(settings.retry_delay_ms),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn per_call_timeout(&self) -> Duration {
        self.per_call_timeout
    }

    /// Run `call` until it succeeds, fails permanently, or retries are exhausted.
    ///
    /// `call` is invoked once per attempt, so it must build a fresh future each
    /// time. The last failure is returned as-is; nothing panics or throws.
    #[instrument(level = "debug", skip_all, fields(%operation))]
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, FailureKind>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FailureKind>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            let outcome = match timeout(self.per_call_timeout, call()).await {
                Ok(Err(FailureKind::Timeout(d))) if d.is_zero() => {
                    Err(FailureKind::Timeout(self.per_call_timeout))
                }
                Ok(res) => res,
                Err(_) => Err(FailureKind::Timeout(self.per_call_timeout)),
            };

            let e = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            attempt += 1;
            let attempt_dt = attempt_t0.elapsed();
            let total_dt = total_t0.elapsed();

            if !e.is_transient() {
                debug!(attempt, kind = e.label(), error = %e, "permanent failure; not retrying");
                return Err(e);
            }

            if attempt > self.max_retries {
                error!(
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_attempt = attempt_dt.as_millis(),
                    elapsed_ms_total = total_dt.as_millis(),
                    kind = e.label(),
                    error = %e,
                    "exhausted retries"
                );
                return Err(e);
            }

            let delay = self.base_delay.saturating_mul(attempt as u32);
            warn!(
                attempt,
                max = self.max_retries,
                elapsed_ms_attempt = attempt_dt.as_millis(),
                elapsed_ms_total = total_dt.as_millis(),
                ?delay,
                kind = e.label(),
                error = %e,
                "attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("per_call_timeout", &self.per_call_timeout)
            .finish()
    }
}

/// Consecutive-failure counter kept by a long-lived caller across cycles.
#[derive(Debug, Clone)]
pub struct FailureStreak {
    consecutive: u32,
    threshold: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Returns the streak length including this failure.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    pub fn exceeded(&self) -> bool {
        self.consecutive > self.threshold
    }

    /// Wait before the next cycle: `normal`, or `extended` once past the threshold.
    pub fn next_wait(&self, normal: Duration, extended: Duration) -> Duration {
        if self.exceeded() { extended } else { normal }
    }

    /// Wait after a crashed cycle: grows with the streak, pinned to `cap` past the threshold.
    pub fn escalating_wait(&self, base: Duration, cap: Duration) -> Duration {
        if self.exceeded() {
            return cap;
        }
        base.saturating_mul(self.consecutive.max(1)).min(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_governor(max_retries: usize) -> Governor {
        Governor::new(max_retries, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gov = fast_governor(3);
        let c = Arc::clone(&calls);
        let res = gov
            .execute("flaky", || {
                let c = Arc::clone(&c);
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(FailureKind::Connection("reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(res, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gov = fast_governor(2);
        let c = Arc::clone(&calls);
        let res: Result<(), _> = gov
            .execute("down", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(FailureKind::HttpStatus {
                        status: 503,
                        url: "u".into(),
                    })
                }
            })
            .await;
        assert!(matches!(res, Err(FailureKind::HttpStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gov = fast_governor(5);
        let c = Arc::clone(&calls);
        let res: Result<(), _> = gov
            .execute("bad", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(FailureKind::Parse("not xml".into()))
                }
            })
            .await;
        assert!(matches!(res, Err(FailureKind::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_call_timeout_aborts_slow_call() {
        let gov = Governor::new(1, Duration::from_millis(1), Duration::from_millis(20));
        let started = Instant::now();
        let res: Result<(), _> = gov
            .execute("slow", || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(FailureKind::Timeout(Duration::from_millis(20))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_failure_streak_cooldown() {
        let mut streak = FailureStreak::new(2);
        let normal = Duration::from_secs(900);
        let extended = Duration::from_secs(1800);

        streak.record_failure();
        streak.record_failure();
        assert!(!streak.exceeded());
        assert_eq!(streak.next_wait(normal, extended), normal);

        assert_eq!(streak.record_failure(), 3);
        assert!(streak.exceeded());
        assert_eq!(streak.next_wait(normal, extended), extended);

        streak.record_success();
        assert!(!streak.exceeded());
        assert_eq!(streak.next_wait(normal, extended), normal);
        assert_eq!(streak.record_failure(), 1);
    }

    #[test]
    fn test_escalating_wait_is_capped() {
        let mut streak = FailureStreak::new(3);
        let base = Duration::from_secs(60);
        let cap = Duration::from_secs(200);
        streak.record_failure();
        assert_eq!(streak.escalating_wait(base, cap), Duration::from_secs(60));
        streak.record_failure();
        assert_eq!(streak.escalating_wait(base, cap), Duration::from_secs(120));
        streak.record_failure();
        assert_eq!(streak.escalating_wait(base, cap), cap);
        streak.record_failure();
        assert!(streak.exceeded());
        assert_eq!(streak.escalating_wait(base, cap), cap);
    }
}
