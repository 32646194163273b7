use async_trait::async_trait;
use leadsync_model::{EnrichmentJob, EnrichmentRequest};

use crate::remote::RemoteError;

/// Third-party data provider that enriches records asynchronously.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Starts a job. `None` means the provider accepted the request without
    /// handing back a job id, so there is nothing to poll.
    async fn submit(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<Option<String>, RemoteError>;

    async fn poll(&self, job_id: &str) -> Result<EnrichmentJob, RemoteError>;
}
