//! Seams to the remote systems a sync run talks to.
//!
//! Adapters live under `infrastructure`; tests substitute in-process fakes.

pub mod campaign;
pub mod contacts;
pub mod enrichment;

pub use campaign::{CampaignSink, SinkReceipt};
pub use contacts::{ContactSource, TriggerQuery};
pub use enrichment::EnrichmentProvider;
