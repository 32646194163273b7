use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use leadsync_config::Config;
use leadsync_core::infrastructure::http::{
    HttpCampaignSink, HttpContactSource, HttpEnrichmentProvider,
};
use leadsync_core::ledger::{self, LedgerStore};
use leadsync_core::model::{BatchResult, RunOutcome};
use leadsync_core::pipeline::{SyncPipeline, SyncPorts};
use leadsync_core::ports::EnrichmentProvider;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared between the scheduler and the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    last_run: Arc<RwLock<Option<BatchResult>>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        Self {
            pipeline,
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn last_run(&self) -> Option<BatchResult> {
        self.last_run.read().await.clone()
    }

    /// Runs one batch and remembers it for `/status`. An overlapping call
    /// returns the skipped outcome and leaves the last batch untouched.
    pub async fn trigger(&self) -> leadsync_core::Result<RunOutcome> {
        let outcome = self.pipeline.run().await?;
        if let RunOutcome::Completed(batch) = &outcome {
            *self.last_run.write().await = Some(batch.clone());
        }
        Ok(outcome)
    }
}

pub async fn open_ledger(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    ledger::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to open the ledger database")
}

/// Wires the HTTP adapters and the ledger named by `config`.
pub async fn connect_ports(config: &Config) -> anyhow::Result<SyncPorts> {
    let source = HttpContactSource::new(config.source.endpoint.http_endpoint("source")?)
        .context("failed to build the contact source client")?;
    let sink =
        HttpCampaignSink::new(config.campaign.endpoint.http_endpoint("campaign")?)
            .context("failed to build the campaign client")?;

    let enrichment: Option<Arc<dyn EnrichmentProvider>> = if config.enrichment.enabled {
        let endpoint = config.enrichment.endpoint.http_endpoint("enrichment")?;
        let provider = HttpEnrichmentProvider::new(endpoint)
            .context("failed to build the enrichment client")?;
        Some(Arc::new(provider))
    } else {
        None
    };

    let ledger = open_ledger(config).await?;
    info!(
        enrichment = config.enrichment.enabled,
        sqlite = config.database.is_sqlite(),
        "collaborators ready"
    );

    Ok(SyncPorts {
        source: Arc::new(source),
        sink: Arc::new(sink),
        enrichment,
        ledger,
    })
}

pub async fn build_pipeline(
    config: &Config,
    cancel: CancellationToken,
) -> anyhow::Result<SyncPipeline> {
    let ports = connect_ports(config).await?;
    SyncPipeline::with_cancellation(config.pipeline_config(), ports, cancel)
        .context("invalid pipeline configuration")
}
