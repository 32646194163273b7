//! Asynchronous enrichment: submit a job, poll it, merge the result.
//!
//! Enrichment is strictly best-effort. Whatever the provider does, the
//! pipeline gets a candidate back and carries on.

mod merge;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadsync_model::{Candidate, EnrichmentRequest, JobStatus};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::EnrichmentProvider;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryExecutor;
use crate::{Result, SyncError};

pub use merge::{
    ENRICHED_AT, ENRICHED_FLAG, MERGE_RULES, MergeStrategy, merge_enrichment,
    strategy_for,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    /// Wall-clock budget for submit plus polling.
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Result of one poll, or of the polling loop as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Continuing,
    Done(BTreeMap<String, String>),
    Failed(String),
    TimedOut,
}

pub struct EnrichmentPoller {
    provider: Arc<dyn EnrichmentProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    options: EnrichmentOptions,
}

impl fmt::Debug for EnrichmentPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichmentPoller")
            .field("provider", &std::any::type_name_of_val(&*self.provider))
            .field("limiter", &self.limiter.name())
            .field("options", &self.options)
            .finish()
    }
}

impl EnrichmentPoller {
    pub fn new(
        provider: Arc<dyn EnrichmentProvider>,
        limiter: Arc<RateLimiter>,
        retry: RetryExecutor,
        options: EnrichmentOptions,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
            options,
        }
    }

    pub fn options(&self) -> &EnrichmentOptions {
        &self.options
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Enriches `candidate`, falling back to an unchanged copy on any
    /// provider failure, timeout or cancellation.
    pub async fn enrich(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Candidate {
        let deadline = Instant::now() + self.options.max_wait;

        let job_id = match timeout_at(deadline, self.submit(candidate, cancel)).await
        {
            Ok(Ok(Some(job_id))) => job_id,
            Ok(Ok(None)) => {
                debug!(record_id = %candidate.id, "provider returned no job id");
                return candidate.clone();
            }
            Ok(Err(err)) => {
                warn!(
                    record_id = %candidate.id,
                    error = %err,
                    "enrichment submit failed, continuing without it"
                );
                return candidate.clone();
            }
            Err(_) => {
                info!(record_id = %candidate.id, "enrichment timed out during submit");
                return candidate.clone();
            }
        };

        match self.poll_until_terminal(&job_id, deadline, cancel).await {
            PollOutcome::Done(data) => {
                debug!(
                    record_id = %candidate.id,
                    job_id,
                    fields = data.len(),
                    "enrichment complete"
                );
                merge_enrichment(candidate, &data, Utc::now())
            }
            PollOutcome::Failed(reason) => {
                warn!(record_id = %candidate.id, job_id, reason, "enrichment failed");
                candidate.clone()
            }
            PollOutcome::TimedOut | PollOutcome::Continuing => {
                info!(
                    record_id = %candidate.id,
                    job_id,
                    max_wait_ms = self.options.max_wait.as_millis() as u64,
                    "enrichment timed out"
                );
                candidate.clone()
            }
        }
    }

    async fn submit(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let request = EnrichmentRequest {
            record_id: candidate.id.clone(),
            email: candidate.normalized_email(),
            hints: candidate.attributes.clone(),
        };

        self.limiter.acquire(cancel).await?;
        let job_id = self
            .retry
            .run("enrichment.submit", || self.provider.submit(&request))
            .await?;
        Ok(job_id)
    }

    /// Sleeps, polls, repeats. Never returns `Continuing`.
    pub async fn poll_until_terminal(
        &self,
        job_id: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::TimedOut;
            }

            let nap = self.options.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancel.cancelled() => {
                    return PollOutcome::Failed("cancelled".to_string());
                }
            }
            if Instant::now() >= deadline {
                return PollOutcome::TimedOut;
            }

            match timeout_at(deadline, self.poll_once(job_id, cancel)).await {
                Ok(PollOutcome::Continuing) => continue,
                Ok(outcome) => return outcome,
                Err(_) => return PollOutcome::TimedOut,
            }
        }
    }

    /// One limited, retried poll. Transport failures read as `Continuing`.
    pub async fn poll_once(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        if let Err(err) = self.limiter.acquire(cancel).await {
            return PollOutcome::Failed(SyncError::from(err).to_string());
        }

        match self
            .retry
            .run("enrichment.poll", || self.provider.poll(job_id))
            .await
        {
            Ok(job) => match job.status {
                JobStatus::Pending => PollOutcome::Continuing,
                JobStatus::Done => PollOutcome::Done(job.data),
                JobStatus::Failed => {
                    PollOutcome::Failed("provider reported failure".to_string())
                }
                JobStatus::Timeout => PollOutcome::TimedOut,
            },
            Err(err) => {
                debug!(job_id, error = %err, "poll failed, will poll again");
                PollOutcome::Continuing
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{NetworkKind, RemoteError};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use leadsync_model::EnrichmentJob;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted poll responses; repeats the last one forever.
    struct ScriptedProvider {
        job_id: Option<String>,
        polls: Mutex<VecDeque<std::result::Result<EnrichmentJob, RemoteError>>>,
        poll_calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(
            job_id: Option<&str>,
            polls: Vec<std::result::Result<EnrichmentJob, RemoteError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                job_id: job_id.map(str::to_string),
                polls: Mutex::new(polls.into()),
                poll_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl EnrichmentProvider for ScriptedProvider {
        async fn submit(
            &self,
            _request: &EnrichmentRequest,
        ) -> std::result::Result<Option<String>, RemoteError> {
            Ok(self.job_id.clone())
        }

        async fn poll(
            &self,
            job_id: &str,
        ) -> std::result::Result<EnrichmentJob, RemoteError> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock();
            let next = if polls.len() > 1 {
                polls.pop_front()
            } else {
                polls.front().cloned()
            };
            next.unwrap_or_else(|| Ok(EnrichmentJob::pending(job_id)))
        }
    }

    fn done(pairs: &[(&str, &str)]) -> EnrichmentJob {
        EnrichmentJob {
            id: "job-1".into(),
            status: JobStatus::Done,
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn poller(provider: Arc<ScriptedProvider>) -> EnrichmentPoller {
        let cancel = CancellationToken::new();
        EnrichmentPoller::new(
            provider,
            Arc::new(
                RateLimiter::new("enrichment", 100, Duration::from_secs(1)).unwrap(),
            ),
            RetryExecutor::new(
                RetryPolicy {
                    max_attempts: 1,
                    ..RetryPolicy::default()
                },
                cancel,
            ),
            EnrichmentOptions {
                max_wait: Duration::from_secs(10),
                poll_interval: Duration::from_secs(1),
            },
        )
    }

    fn candidate() -> Candidate {
        Candidate::new("c1")
            .with_email("a@x.com")
            .with_attribute("first_name", "Ada")
    }

    #[tokio::test(start_paused = true)]
    async fn merges_once_job_is_done() {
        let provider = ScriptedProvider::new(
            Some("job-1"),
            vec![
                Ok(EnrichmentJob::pending("job-1")),
                Ok(done(&[("first_name", "Other"), ("company", "Acme")])),
            ],
        );
        let poller = poller(Arc::clone(&provider));

        let enriched = poller.enrich(&candidate(), &CancellationToken::new()).await;

        assert_eq!(enriched.attribute("first_name"), Some("Ada"));
        assert_eq!(enriched.attribute("company"), Some("Acme"));
        assert_eq!(enriched.attribute(ENRICHED_FLAG), Some("true"));
        assert_eq!(provider.poll_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_job_id_returns_original() {
        let provider = ScriptedProvider::new(None, vec![]);
        let poller = poller(Arc::clone(&provider));

        let result = poller.enrich(&candidate(), &CancellationToken::new()).await;

        assert_eq!(result, candidate());
        assert_eq!(provider.poll_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failure_returns_original() {
        let mut failed = EnrichmentJob::pending("job-1");
        failed.status = JobStatus::Failed;
        let provider = ScriptedProvider::new(Some("job-1"), vec![Ok(failed)]);

        let result = poller(provider)
            .enrich(&candidate(), &CancellationToken::new())
            .await;
        assert_eq!(result, candidate());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_tolerated() {
        let provider = ScriptedProvider::new(
            Some("job-1"),
            vec![
                Err(RemoteError::network(NetworkKind::ConnectionReset, "reset")),
                Err(RemoteError::status(500, "oops")),
                Ok(done(&[("company", "Acme")])),
            ],
        );

        let enriched = poller(Arc::clone(&provider))
            .enrich(&candidate(), &CancellationToken::new())
            .await;
        assert_eq!(enriched.attribute("company"), Some("Acme"));
        assert_eq!(provider.poll_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_within_wait_budget() {
        let provider = ScriptedProvider::new(
            Some("job-1"),
            vec![Ok(EnrichmentJob::pending("job-1"))],
        );
        let poller = poller(Arc::clone(&provider));
        let options = *poller.options();
        let start = Instant::now();

        let result = poller.enrich(&candidate(), &CancellationToken::new()).await;

        assert_eq!(result, candidate());
        assert!(start.elapsed() <= options.max_wait + options.poll_interval);
        assert!(provider.poll_calls.load(Ordering::SeqCst) >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let provider = ScriptedProvider::new(
            Some("job-1"),
            vec![Ok(EnrichmentJob::pending("job-1"))],
        );
        let poller = poller(Arc::clone(&provider));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = poller.enrich(&candidate(), &cancel).await;
        assert_eq!(result, candidate());
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
