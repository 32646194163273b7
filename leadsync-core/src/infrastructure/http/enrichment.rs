use std::collections::BTreeMap;

use async_trait::async_trait;
use leadsync_model::{EnrichmentJob, EnrichmentRequest, JobStatus};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use super::{HttpEndpoint, check_status, flatten_value, json_or_default};
use crate::ports::EnrichmentProvider;
use crate::remote::RemoteError;

#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Providers send `null` as readily as they omit a key.
#[derive(Debug, Deserialize)]
struct JobResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<BTreeMap<String, serde_json::Value>>,
}

/// Job submission and polling under `{base}/enrichments`.
#[derive(Clone, Debug)]
pub struct HttpEnrichmentProvider {
    endpoint: HttpEndpoint,
    client: Client,
}

impl HttpEnrichmentProvider {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self, RemoteError> {
        let client = endpoint.client()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl EnrichmentProvider for HttpEnrichmentProvider {
    #[instrument(skip(self, request), fields(record_id = %request.record_id), err)]
    async fn submit(
        &self,
        request: &EnrichmentRequest,
    ) -> Result<Option<String>, RemoteError> {
        let response = self
            .client
            .post(self.endpoint.url(&["enrichments"])?)
            .bearer_auth(self.endpoint.api_key().expose())
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: SubmitResponse = json_or_default(response).await?;
        Ok(body.id.filter(|id| !id.trim().is_empty()))
    }

    async fn poll(&self, job_id: &str) -> Result<EnrichmentJob, RemoteError> {
        let response = self
            .client
            .get(self.endpoint.url(&["enrichments", job_id])?)
            .bearer_auth(self.endpoint.api_key().expose())
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: JobResponse = response.json().await?;

        Ok(EnrichmentJob {
            id: job_id.to_string(),
            status: JobStatus::parse(body.status.as_deref().unwrap_or_default()),
            data: body
                .data
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(key, value)| flatten_value(value).map(|v| (key, v)))
                .collect(),
        })
    }
}
