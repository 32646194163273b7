//! Core data model definitions shared across leadsync crates.
#![allow(missing_docs)]

pub mod batch;
pub mod candidate;
pub mod enrichment;
pub mod ledger;
pub mod rate_limit;

// Intentionally curated re-exports for downstream consumers.
pub use batch::{
    BatchResult, CandidateOutcome, RecordError, RunOutcome, RunSkipped,
    SkipReason,
};
pub use candidate::{Candidate, LeadPayload, normalize_email};
pub use enrichment::{EnrichmentJob, EnrichmentRequest, JobStatus};
pub use ledger::{LedgerEntry, LedgerMetadata, LedgerStats};
pub use rate_limit::LimiterStatus;
