//! # leadsync core
//!
//! The resilient half of leadsync: everything between "a record was
//! triggered in the CRM" and "the lead is in its campaign exactly once".
//!
//! - [`rate_limit`]: sliding window limiter shared by every caller of a
//!   remote API
//! - [`retry`]: bounded exponential backoff for transient failures
//! - [`ledger`]: durable idempotency record keyed by record id and email
//! - [`enrichment`]: submit-and-poll enrichment with a wall-clock budget
//! - [`pipeline`]: the per-candidate state machine and batch summary
//! - [`infrastructure::http`]: JSON-over-HTTP adapters for the [`ports`]
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use leadsync_core::infrastructure::http::{
//!     ApiKey, HttpCampaignSink, HttpContactSource, HttpEndpoint,
//! };
//! use leadsync_core::ledger;
//! use leadsync_core::pipeline::{PipelineConfig, SyncPipeline, SyncPorts};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let crm = HttpEndpoint::parse("https://crm.example.com/api", ApiKey::new("crm-key"))?;
//! let outreach =
//!     HttpEndpoint::parse("https://outreach.example.com/api", ApiKey::new("out-key"))?;
//!
//! let pipeline = SyncPipeline::new(
//!     PipelineConfig::new("lead_status", "ready").with_owner("owner-1", Some("spring")),
//!     SyncPorts {
//!         source: Arc::new(HttpContactSource::new(crm)?),
//!         sink: Arc::new(HttpCampaignSink::new(outreach)?),
//!         enrichment: None,
//!         ledger: ledger::connect("sqlite://leadsync.db", 4).await?,
//!     },
//! )?;
//!
//! let outcome = pipeline.run().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod enrichment;
pub mod error;
pub mod infrastructure;
pub mod ledger;
pub mod pipeline;
pub mod ports;
pub mod rate_limit;
pub mod remote;
pub mod retry;

pub use error::{Result, SyncError};
pub use leadsync_model as model;
pub use remote::{NetworkKind, RemoteError, RetryHint};
