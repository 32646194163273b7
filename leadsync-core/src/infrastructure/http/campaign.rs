use async_trait::async_trait;
use leadsync_model::LeadPayload;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use super::{HttpEndpoint, check_status, json_or_default};
use crate::ports::{CampaignSink, SinkReceipt};
use crate::remote::RemoteError;

#[derive(Debug, Default, Deserialize)]
struct AddLeadResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Campaign membership under `{base}/campaigns/{destination}/leads`.
#[derive(Clone, Debug)]
pub struct HttpCampaignSink {
    endpoint: HttpEndpoint,
    client: Client,
}

impl HttpCampaignSink {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self, RemoteError> {
        let client = endpoint.client()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl CampaignSink for HttpCampaignSink {
    #[instrument(skip(self, email), err)]
    async fn exists(
        &self,
        destination: &str,
        email: &str,
    ) -> Result<bool, RemoteError> {
        let response = self
            .client
            .get(self.endpoint.url(&["campaigns", destination, "leads"])?)
            .bearer_auth(self.endpoint.api_key().expose())
            .query(&[("email", email)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    #[instrument(skip(self, lead), fields(record_id = %lead.record_id), err)]
    async fn add(
        &self,
        destination: &str,
        lead: &LeadPayload,
    ) -> Result<SinkReceipt, RemoteError> {
        let response = self
            .client
            .post(self.endpoint.url(&["campaigns", destination, "leads"])?)
            .bearer_auth(self.endpoint.api_key().expose())
            .json(lead)
            .send()
            .await?;

        // The destination already holds this lead; converge instead of failing.
        if response.status() == StatusCode::CONFLICT {
            return Ok(SinkReceipt::already_present());
        }
        let response = check_status(response).await?;
        let body: AddLeadResponse = json_or_default(response).await?;
        Ok(SinkReceipt::created(body.id))
    }
}
