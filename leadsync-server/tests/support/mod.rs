#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use leadsync_core::ledger::SqliteLedger;
use leadsync_core::model::{Candidate, LeadPayload};
use leadsync_core::pipeline::{PipelineConfig, SyncPipeline, SyncPorts};
use leadsync_core::ports::{CampaignSink, ContactSource, SinkReceipt, TriggerQuery};
use leadsync_core::RemoteError;
use leadsync_server::AppState;
use tokio::sync::Mutex;

/// Returns the same candidates on every search and counts the calls.
pub struct CountingSource {
    pub candidates: Vec<Candidate>,
    pub calls: AtomicU32,
}

#[async_trait]
impl ContactSource for CountingSource {
    async fn search_triggered(
        &self,
        _query: &TriggerQuery,
    ) -> Result<Vec<Candidate>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.clone())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub present: Mutex<HashSet<String>>,
}

#[async_trait]
impl CampaignSink for MemorySink {
    async fn exists(&self, _destination: &str, email: &str) -> Result<bool, RemoteError> {
        Ok(self.present.lock().await.contains(email))
    }

    async fn add(
        &self,
        _destination: &str,
        lead: &LeadPayload,
    ) -> Result<SinkReceipt, RemoteError> {
        if self.present.lock().await.insert(lead.email.clone()) {
            Ok(SinkReceipt::created(Some(format!("lead-{}", lead.record_id))))
        } else {
            Ok(SinkReceipt::already_present())
        }
    }
}

pub struct Harness {
    pub state: AppState,
    pub source: Arc<CountingSource>,
    pub sink: Arc<MemorySink>,
}

pub async fn harness(candidates: Vec<Candidate>) -> Harness {
    let source = Arc::new(CountingSource {
        candidates,
        calls: AtomicU32::new(0),
    });
    let sink = Arc::new(MemorySink::default());
    let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());

    let config = PipelineConfig::new("lead_status", "ready").with_owner("o1", Some("spring"));
    let pipeline = SyncPipeline::new(
        config,
        SyncPorts {
            source: source.clone(),
            sink: sink.clone(),
            enrichment: None,
            ledger,
        },
    )
    .unwrap();

    Harness {
        state: AppState::new(Arc::new(pipeline)),
        source,
        sink,
    }
}

pub fn lead(id: &str, email: &str) -> Candidate {
    Candidate::new(id).with_email(email).with_owner("o1")
}
