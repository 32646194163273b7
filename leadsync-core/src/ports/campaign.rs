use async_trait::async_trait;
use leadsync_model::LeadPayload;

use crate::remote::RemoteError;

/// What the destination reported after an add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkReceipt {
    /// Destination-side id, when the remote returns one.
    pub remote_id: Option<String>,
    /// The destination rejected the add because the lead was already there.
    pub already_present: bool,
}

impl SinkReceipt {
    pub fn created(remote_id: Option<String>) -> Self {
        Self {
            remote_id,
            already_present: false,
        }
    }

    pub fn already_present() -> Self {
        Self {
            remote_id: None,
            already_present: true,
        }
    }
}

/// Outreach platform that receives enrolled leads, grouped by destination.
#[async_trait]
pub trait CampaignSink: Send + Sync {
    async fn exists(
        &self,
        destination: &str,
        email: &str,
    ) -> Result<bool, RemoteError>;

    async fn add(
        &self,
        destination: &str,
        lead: &LeadPayload,
    ) -> Result<SinkReceipt, RemoteError>;
}
