use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use leadsync_model::{
    BatchResult, Candidate, CandidateOutcome, LeadPayload, LedgerMetadata,
    LedgerStats, LimiterStatus, RunOutcome, RunSkipped, SkipReason,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::PipelineConfig;
use super::exclusion::first_match;
use crate::enrichment::{ENRICHED_FLAG, EnrichmentPoller};
use crate::ledger::LedgerStore;
use crate::ports::{CampaignSink, ContactSource, EnrichmentProvider, SinkReceipt};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryExecutor;
use crate::{Result, SyncError};

pub const REASON_REMOTE_EXISTS: &str = "remote_exists";

/// The collaborators a pipeline talks to.
pub struct SyncPorts {
    pub source: Arc<dyn ContactSource>,
    pub sink: Arc<dyn CampaignSink>,
    /// Ignored when enrichment is disabled in the configuration.
    pub enrichment: Option<Arc<dyn EnrichmentProvider>>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl fmt::Debug for SyncPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPorts")
            .field("enrichment", &self.enrichment.is_some())
            .finish_non_exhaustive()
    }
}

/// Owner resolution result for a candidate that may proceed.
struct Route {
    owner_id: String,
    destination: String,
}

/// Clears the in-flight flag when the run ends, however it ends.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Moves triggered candidates into their destination campaigns.
///
/// One instance owns the limiters and the in-flight flag; share it behind an
/// `Arc` so every trigger (timer, HTTP, CLI) observes the same run state.
pub struct SyncPipeline {
    source: Arc<dyn ContactSource>,
    sink: Arc<dyn CampaignSink>,
    ledger: Arc<dyn LedgerStore>,
    enricher: Option<EnrichmentPoller>,
    campaign_limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    config: PipelineConfig,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl fmt::Debug for SyncPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("campaign_limiter", &self.campaign_limiter.name())
            .field("enricher", &self.enricher)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SyncPipeline {
    pub fn new(config: PipelineConfig, ports: SyncPorts) -> Result<Self> {
        Self::with_cancellation(config, ports, CancellationToken::new())
    }

    /// Builds a pipeline bound to an externally owned cancellation token.
    pub fn with_cancellation(
        config: PipelineConfig,
        ports: SyncPorts,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let retry = RetryExecutor::new(config.retry, cancel.clone());
        let campaign_limiter = Arc::new(RateLimiter::new(
            "campaign",
            config.campaign_limit.max_requests,
            config.campaign_limit.window,
        )?);

        let enricher = match (config.enrichment, ports.enrichment) {
            (Some(options), Some(provider)) => {
                let limiter = Arc::new(RateLimiter::new(
                    "enrichment",
                    config.enrichment_limit.max_requests,
                    config.enrichment_limit.window,
                )?);
                Some(EnrichmentPoller::new(
                    provider,
                    limiter,
                    retry.clone(),
                    options,
                ))
            }
            (Some(_), None) => {
                warn!("enrichment configured without a provider; disabled");
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            source: ports.source,
            sink: ports.sink,
            ledger: ports.ledger,
            enricher,
            campaign_limiter,
            retry,
            config,
            running: AtomicBool::new(false),
            cancel,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops an in-flight run at its next suspension point. The token is
    /// shared, so later runs return immediately with `cancelled = true`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn limiter_status(&self) -> Vec<LimiterStatus> {
        let mut statuses = vec![self.campaign_limiter.status()];
        if let Some(enricher) = &self.enricher {
            statuses.push(enricher.limiter().status());
        }
        statuses
    }

    pub async fn ledger_stats(&self) -> Result<LedgerStats> {
        Ok(self.ledger.stats().await?)
    }

    /// Runs one batch over every currently triggered candidate.
    ///
    /// Only configuration and source failures are returned as errors; a
    /// failing candidate is recorded in the batch and the loop moves on.
    pub async fn run(&self) -> Result<RunOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("sync run requested while another is in flight");
            return Ok(RunOutcome::Skipped(RunSkipped::already_running()));
        };

        let mut batch = BatchResult::begin(self.config.max_recorded_errors);
        info!(run_id = %batch.run_id, "sync run started");

        let candidates = self.fetch_candidates().await?;
        info!(
            run_id = %batch.run_id,
            candidates = candidates.len(),
            "fetched triggered candidates"
        );

        for candidate in &candidates {
            if self.cancel.is_cancelled() {
                batch.mark_cancelled();
                break;
            }

            let outcome = match self.process(candidate).await {
                Ok(outcome) => outcome,
                Err(_) if self.cancel.is_cancelled() => {
                    batch.mark_cancelled();
                    break;
                }
                Err(err) => {
                    warn!(
                        record_id = %candidate.id,
                        error = %err,
                        "candidate failed"
                    );
                    CandidateOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };

            debug!(
                record_id = %candidate.id,
                outcome = outcome.label(),
                "candidate finished"
            );
            batch.record(&candidate.id, &outcome);
        }

        let batch = batch.finish();
        info!(
            run_id = %batch.run_id,
            processed = batch.processed,
            succeeded = batch.succeeded,
            failed = batch.failed,
            skipped = batch.skipped,
            excluded = batch.excluded,
            duplicate = batch.duplicate,
            cancelled = batch.cancelled,
            "sync run finished"
        );
        Ok(RunOutcome::Completed(batch))
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>> {
        let query = self.config.trigger_query();
        self.retry
            .run("source.search_triggered", || {
                self.source.search_triggered(&query)
            })
            .await
            .map_err(SyncError::Source)
    }

    async fn process(&self, candidate: &Candidate) -> Result<CandidateOutcome> {
        if let Some(rule) = first_match(&self.config.exclusions, candidate) {
            return Ok(CandidateOutcome::Excluded {
                rule: rule.to_string(),
            });
        }

        let Some(email) = candidate.normalized_email() else {
            return Ok(CandidateOutcome::skipped(SkipReason::MissingEmail));
        };

        let route = match self.resolve_route(candidate) {
            Ok(route) => route,
            Err(reason) => return Ok(CandidateOutcome::skipped(reason)),
        };

        if self.ledger.is_processed(&candidate.id).await?
            || self.ledger.is_email_processed(&email).await?
        {
            return Ok(CandidateOutcome::skipped(SkipReason::AlreadyProcessed));
        }

        let metadata =
            LedgerMetadata::new(&email, &route.owner_id, &route.destination);

        if self.remote_exists(&route.destination, &email).await? {
            self.ledger
                .mark_processed(
                    &candidate.id,
                    &metadata.with_extra("reason", REASON_REMOTE_EXISTS),
                )
                .await?;
            return Ok(CandidateOutcome::MarkedDuplicate {
                destination: route.destination,
            });
        }

        let enriched = match &self.enricher {
            Some(enricher) => enricher.enrich(candidate, &self.cancel).await,
            None => candidate.clone(),
        };

        let payload = LeadPayload::from_candidate(&enriched, email, route.owner_id);
        let receipt = self.submit(&route.destination, &payload).await?;

        let metadata = annotate(metadata, &receipt, &enriched);
        self.ledger.mark_processed(&candidate.id, &metadata).await?;

        if receipt.already_present {
            return Ok(CandidateOutcome::MarkedDuplicate {
                destination: route.destination,
            });
        }
        Ok(CandidateOutcome::Succeeded {
            destination: route.destination,
        })
    }

    fn resolve_route(
        &self,
        candidate: &Candidate,
    ) -> std::result::Result<Route, SkipReason> {
        let owner_id = candidate.owner().ok_or(SkipReason::UnknownOwner)?;
        let mapped = self
            .config
            .owners
            .get(owner_id)
            .ok_or(SkipReason::UnknownOwner)?;

        let destination = non_blank(mapped.as_deref())
            .or_else(|| non_blank(self.config.default_destination.as_deref()))
            .ok_or(SkipReason::NoDestination)?;

        Ok(Route {
            owner_id: owner_id.to_string(),
            destination: destination.to_string(),
        })
    }

    async fn remote_exists(&self, destination: &str, email: &str) -> Result<bool> {
        self.campaign_limiter.acquire(&self.cancel).await?;
        let exists = self
            .retry
            .run("campaign.exists", || self.sink.exists(destination, email))
            .await?;
        Ok(exists)
    }

    async fn submit(
        &self,
        destination: &str,
        payload: &LeadPayload,
    ) -> Result<SinkReceipt> {
        self.campaign_limiter.acquire(&self.cancel).await?;
        let receipt = self
            .retry
            .run("campaign.add", || self.sink.add(destination, payload))
            .await?;
        Ok(receipt)
    }
}

fn annotate(
    mut metadata: LedgerMetadata,
    receipt: &SinkReceipt,
    enriched: &Candidate,
) -> LedgerMetadata {
    if let Some(remote_id) = &receipt.remote_id {
        metadata = metadata.with_extra("remote_id", remote_id);
    }
    if receipt.already_present {
        metadata = metadata.with_extra("reason", REASON_REMOTE_EXISTS);
    }
    if enriched.attribute(ENRICHED_FLAG).is_some() {
        metadata = metadata.with_extra(ENRICHED_FLAG, "true");
    }
    metadata
}

fn non_blank(destination: Option<&str>) -> Option<&str> {
    destination.map(str::trim).filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerError, MockLedgerStore};
    use crate::ports::TriggerQuery;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use mockall::predicate::eq;

    struct FixedSource(Vec<Candidate>);

    #[async_trait]
    impl ContactSource for FixedSource {
        async fn search_triggered(
            &self,
            _query: &TriggerQuery,
        ) -> std::result::Result<Vec<Candidate>, RemoteError> {
            Ok(self.0.clone())
        }
    }

    struct AcceptingSink;

    #[async_trait]
    impl CampaignSink for AcceptingSink {
        async fn exists(
            &self,
            _destination: &str,
            _email: &str,
        ) -> std::result::Result<bool, RemoteError> {
            Ok(false)
        }

        async fn add(
            &self,
            _destination: &str,
            _lead: &LeadPayload,
        ) -> std::result::Result<SinkReceipt, RemoteError> {
            Ok(SinkReceipt::created(Some("lead-1".into())))
        }
    }

    fn pipeline(ledger: MockLedgerStore, candidates: Vec<Candidate>) -> SyncPipeline {
        let config = PipelineConfig::new("lead_status", "ready")
            .with_owner("o1", Some("campaign-a"));
        SyncPipeline::new(
            config,
            SyncPorts {
                source: Arc::new(FixedSource(candidates)),
                sink: Arc::new(AcceptingSink),
                enrichment: None,
                ledger: Arc::new(ledger),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ledger_write_failure_fails_only_that_candidate() {
        let mut ledger = MockLedgerStore::new();
        ledger.expect_is_processed().returning(|_| Ok(false));
        ledger.expect_is_email_processed().returning(|_| Ok(false));
        ledger
            .expect_mark_processed()
            .withf(|record_id, _| record_id == "c1")
            .times(1)
            .returning(|_, _| Err(LedgerError::Query("disk full".into())));
        ledger
            .expect_mark_processed()
            .withf(|record_id, metadata| {
                record_id == "c2"
                    && metadata.destination == "campaign-a"
                    && metadata.extra.get("remote_id").map(String::as_str)
                        == Some("lead-1")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let pipeline = pipeline(
            ledger,
            vec![
                Candidate::new("c1").with_email("a@x.com").with_owner("o1"),
                Candidate::new("c2").with_email("b@x.com").with_owner("o1"),
            ],
        );

        let batch = pipeline.run().await.unwrap().into_batch().unwrap();
        assert_eq!(batch.processed, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.errors[0].record_id, "c1");
        assert!(batch.errors[0].error.contains("disk full"));
    }

    #[tokio::test]
    async fn ledger_hit_by_email_short_circuits() {
        let mut ledger = MockLedgerStore::new();
        ledger
            .expect_is_processed()
            .with(eq("c1"))
            .returning(|_| Ok(false));
        ledger
            .expect_is_email_processed()
            .with(eq("a@x.com"))
            .returning(|_| Ok(true));
        ledger.expect_mark_processed().never();

        let pipeline = pipeline(
            ledger,
            vec![Candidate::new("c1").with_email(" A@X.com").with_owner("o1")],
        );

        let batch = pipeline.run().await.unwrap().into_batch().unwrap();
        assert_eq!(batch.duplicate, 1);
        assert_eq!(batch.succeeded, 0);
    }

    #[tokio::test]
    async fn owner_resolution_falls_back_to_default() {
        let mut config = PipelineConfig::new("lead_status", "ready")
            .with_owner("o1", Some("campaign-a"))
            .with_owner("o2", None);
        let ports = || SyncPorts {
            source: Arc::new(FixedSource(vec![])),
            sink: Arc::new(AcceptingSink),
            enrichment: None,
            ledger: Arc::new(MockLedgerStore::new()),
        };

        let without_default = SyncPipeline::new(config.clone(), ports()).unwrap();
        let mapped = Candidate::new("c1").with_owner("o1");
        let unrouted = Candidate::new("c2").with_owner("o2");
        let stranger = Candidate::new("c3").with_owner("o9");
        let ownerless = Candidate::new("c4");

        assert_eq!(
            without_default.resolve_route(&mapped).unwrap().destination,
            "campaign-a"
        );
        assert_eq!(
            without_default.resolve_route(&unrouted).err(),
            Some(SkipReason::NoDestination)
        );
        assert_eq!(
            without_default.resolve_route(&stranger).err(),
            Some(SkipReason::UnknownOwner)
        );
        assert_eq!(
            without_default.resolve_route(&ownerless).err(),
            Some(SkipReason::UnknownOwner)
        );

        config.default_destination = Some("campaign-default".into());
        let with_default = SyncPipeline::new(config, ports()).unwrap();
        assert_eq!(
            with_default.resolve_route(&unrouted).unwrap().destination,
            "campaign-default"
        );
        assert_eq!(
            with_default.resolve_route(&stranger).err(),
            Some(SkipReason::UnknownOwner)
        );
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = PipelineConfig::new("lead_status", "ready");
        config.campaign_limit.max_requests = 0;
        let result = SyncPipeline::new(
            config,
            SyncPorts {
                source: Arc::new(FixedSource(vec![])),
                sink: Arc::new(AcceptingSink),
                enrichment: None,
                ledger: Arc::new(MockLedgerStore::new()),
            },
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
