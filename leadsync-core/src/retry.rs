//! Bounded retries with exponential backoff for transient remote failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::remote::RetryHint;

/// Classification seam between an error type and the retry executor.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Explicit server guidance; replaces the computed backoff when present.
    fn retry_hint(&self) -> Option<RetryHint> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Symmetric jitter applied to the computed backoff.
    pub jitter_ratio: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// `base * 2^(attempt-1)` capped at the maximum, before jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = attempt.saturating_sub(1).min(62) as i32;
        let scaled = (self.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let anchor = self.base_delay_ms(attempt) as f64;
        if anchor == 0.0 {
            return Duration::ZERO;
        }

        let ratio = f64::from(self.jitter_ratio.clamp(0.0, 1.0));
        let factor = if ratio == 0.0 {
            1.0
        } else {
            rand::rng().random_range((1.0 - ratio)..=(1.0 + ratio))
        };
        Duration::from_millis((anchor * factor).round() as u64)
    }
}

/// Observer payload for each retry that is about to be scheduled.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    pub operation: &'a str,
    /// The attempt that just failed, starting at 1.
    pub attempt: u32,
    pub delay: Duration,
    /// Whether `delay` came from the server rather than the backoff curve.
    pub hinted: bool,
    pub error: &'a E,
}

#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        self.run_observed(operation, op, |_| {}).await
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `observe` fires once per scheduled retry, before the backoff sleep.
    /// Cancellation during a sleep ends the loop with the last error.
    pub async fn run_observed<T, E, F, Fut, O>(
        &self,
        operation: &str,
        mut op: F,
        mut observe: O,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
        O: FnMut(&RetryAttempt<'_, E>),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(
                    operation,
                    attempt,
                    error = %error,
                    "terminal failure, not retrying"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    operation,
                    attempts = attempt,
                    error = %error,
                    "retries exhausted"
                );
                return Err(error);
            }

            let (delay, hinted) = match error.retry_hint() {
                Some(hint) => (hint.delay_from(Utc::now()), true),
                None => (self.policy.jittered_delay(attempt), false),
            };

            observe(&RetryAttempt {
                operation,
                attempt,
                delay,
                hinted,
                error: &error,
            });

            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                hinted,
                error = %error,
                "transient failure, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    info!(operation, attempt, "retry abandoned: cancelled");
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{NetworkKind, RemoteError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            jitter_ratio: 0.1,
        }
    }

    #[test]
    fn base_delay_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.base_delay_ms(0), 0);
        assert_eq!(policy.base_delay_ms(1), 100);
        assert_eq!(policy.base_delay_ms(2), 200);
        assert_eq!(policy.base_delay_ms(3), 400);
        assert_eq!(policy.base_delay_ms(5), 1_000);
        assert_eq!(policy.base_delay_ms(200), 1_000);
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let policy = policy(10);
        for attempt in 1..=4 {
            let anchor = policy.base_delay_ms(attempt) as f64;
            for _ in 0..200 {
                let delay = policy.jittered_delay(attempt).as_millis() as f64;
                assert!(delay >= (anchor * 0.9).floor(), "{delay} < 0.9*{anchor}");
                assert!(delay <= (anchor * 1.1).ceil(), "{delay} > 1.1*{anchor}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let executor = RetryExecutor::new(policy(3), CancellationToken::new());
        let calls = Arc::new(AtomicU32::new(0));
        let mut observed = Vec::new();

        let result = executor
            .run_observed(
                "campaign.add",
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(RemoteError::status(503, "unavailable"))
                        } else {
                            Ok("created")
                        }
                    }
                },
                |retry| observed.push((retry.attempt, retry.delay)),
            )
            .await;

        assert_eq!(result, Ok("created"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0].0, 1);
        assert_eq!(observed[1].0, 2);
        let first = observed[0].1.as_millis();
        let second = observed[1].1.as_millis();
        assert!((90..=110).contains(&first), "first delay {first}ms");
        assert!((180..=220).contains(&second), "second delay {second}ms");
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let executor = RetryExecutor::new(policy(5), CancellationToken::new());
        let calls = AtomicU32::new(0);
        let mut retries = 0;

        let result: Result<(), _> = executor
            .run_observed(
                "campaign.add",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RemoteError::status(400, "bad payload")) }
                },
                |_| retries += 1,
            )
            .await;

        assert_eq!(result.unwrap_err().status_code(), Some(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(policy(3), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .run("contacts.search", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RemoteError::network(NetworkKind::ConnectionReset, "reset"))
                }
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_hint_overrides_backoff() {
        let executor = RetryExecutor::new(policy(2), CancellationToken::new());
        let calls = AtomicU32::new(0);
        let mut hinted = Vec::new();
        let start = Instant::now();

        let result = executor
            .run_observed(
                "campaign.exists",
                || {
                    let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            Err(RemoteError::status(429, "slow down")
                                .with_retry_after(RetryHint::After(
                                    Duration::from_secs(5),
                                )))
                        } else {
                            Ok(true)
                        }
                    }
                },
                |retry| hinted.push((retry.hinted, retry.delay)),
            )
            .await;

        assert_eq!(result, Ok(true));
        assert_eq!(hinted, vec![(true, Duration::from_secs(5))]);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_last_error() {
        let cancel = CancellationToken::new();
        let executor = RetryExecutor::new(
            RetryPolicy {
                max_attempts: 5,
                backoff_base_ms: 60_000,
                backoff_max_ms: 60_000,
                jitter_ratio: 0.0,
            },
            cancel.clone(),
        );
        let calls = AtomicU32::new(0);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let result: Result<(), _> = executor
            .run("campaign.add", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::status(502, "bad gateway")) }
            })
            .await;
        canceller.await.unwrap();

        assert_eq!(result.unwrap_err().status_code(), Some(502));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
