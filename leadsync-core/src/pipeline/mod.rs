//! The sync pipeline: per-candidate state machine plus batch bookkeeping.

pub mod config;
pub mod exclusion;
mod orchestrator;

pub use config::{LimitSettings, PipelineConfig, TriggerSettings};
pub use exclusion::{ExclusionRule, first_match};
pub use orchestrator::{SyncPipeline, SyncPorts};
