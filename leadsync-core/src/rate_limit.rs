//! Sliding window log rate limiting for outbound calls.
//!
//! Each limiter guards one remote collaborator. Admissions are kept as a log
//! of instants; a slot frees up exactly one window after the admission that
//! took it, so no window-length interval ever sees more than `max_requests`.

use std::collections::VecDeque;
use std::time::Duration;

use leadsync_model::LimiterStatus;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limiter '{limiter}' wait cancelled")]
    Cancelled { limiter: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_requests: u32,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(
        name: impl Into<String>,
        max_requests: u32,
        window: Duration,
    ) -> RateLimitResult<Self> {
        let name = name.into();
        if max_requests == 0 {
            return Err(RateLimitError::InvalidConfig(format!(
                "limiter '{name}' must admit at least one request per window"
            )));
        }
        if window.is_zero() {
            return Err(RateLimitError::InvalidConfig(format!(
                "limiter '{name}' window must be non-zero"
            )));
        }
        Ok(Self {
            name,
            max_requests,
            window,
            admissions: Mutex::new(VecDeque::with_capacity(
                max_requests as usize,
            )),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until a slot is free, then records the admission.
    ///
    /// The window is re-checked after every sleep since other waiters may
    /// have claimed the slot first.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> RateLimitResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            let Some(wait) = self.admit_or_wait(Instant::now()) else {
                return Ok(());
            };

            trace!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "window full, waiting for a slot"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(self.cancelled()),
            }
        }
    }

    /// Admits immediately if a slot is free; never waits.
    pub fn try_acquire(&self) -> bool {
        self.admit_or_wait(Instant::now()).is_none()
    }

    pub fn status(&self) -> LimiterStatus {
        let now = Instant::now();
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);

        let used = admissions.len() as u32;
        let available = self.max_requests.saturating_sub(used);
        let wait = if available > 0 {
            Duration::ZERO
        } else {
            admissions
                .front()
                .map(|oldest| self.remaining(*oldest, now))
                .unwrap_or(Duration::ZERO)
        };

        LimiterStatus {
            name: self.name.clone(),
            available,
            max: self.max_requests,
            wait,
        }
    }

    /// Check and insert happen under one lock so two callers can never both
    /// observe the last free slot.
    fn admit_or_wait(&self, now: Instant) -> Option<Duration> {
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);

        if admissions.len() < self.max_requests as usize {
            admissions.push_back(now);
            return None;
        }

        admissions
            .front()
            .map(|oldest| self.remaining(*oldest, now))
    }

    fn prune(&self, admissions: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admissions.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }
    }

    fn remaining(&self, admitted_at: Instant, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(admitted_at))
    }

    fn cancelled(&self) -> RateLimitError {
        RateLimitError::Cancelled {
            limiter: self.name.clone(),
        }
    }
}
