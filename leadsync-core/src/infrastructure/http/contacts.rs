use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use leadsync_model::Candidate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{HttpEndpoint, check_status, flatten_value};
use crate::ports::{ContactSource, TriggerQuery};
use crate::remote::RemoteError;

const EMAIL_PROPERTY: &str = "email";
const OWNER_PROPERTY: &str = "owner_id";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    filter: SearchFilter<'a>,
    properties: Vec<&'a str>,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SearchFilter<'a> {
    field: &'a str,
    value: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContactRecord>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct ContactRecord {
    id: String,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

impl ContactRecord {
    fn into_candidate(self) -> Candidate {
        let mut properties = self.properties;
        let email = properties.remove(EMAIL_PROPERTY).and_then(flatten_value);
        let owner_id = properties.remove(OWNER_PROPERTY).and_then(flatten_value);
        Candidate {
            id: self.id,
            email,
            owner_id,
            attributes: properties
                .into_iter()
                .filter_map(|(key, value)| flatten_value(value).map(|v| (key, v)))
                .collect(),
        }
    }
}

/// Searches `{base}/contacts/search`, following `paging.next.after`.
#[derive(Clone, Debug)]
pub struct HttpContactSource {
    endpoint: HttpEndpoint,
    client: Client,
}

impl HttpContactSource {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self, RemoteError> {
        let client = endpoint.client()?;
        Ok(Self { endpoint, client })
    }

    async fn fetch_page(
        &self,
        query: &TriggerQuery,
        after: Option<&str>,
    ) -> Result<SearchResponse, RemoteError> {
        let mut properties = vec![EMAIL_PROPERTY, OWNER_PROPERTY];
        properties.extend(query.properties.iter().map(String::as_str));

        let body = SearchRequest {
            filter: SearchFilter {
                field: &query.field,
                value: &query.value,
            },
            properties,
            limit: PAGE_SIZE,
            after,
        };

        let response = self
            .client
            .post(self.endpoint.url(&["contacts", "search"])?)
            .bearer_auth(self.endpoint.api_key().expose())
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        super::json_or_default(response).await
    }
}

#[async_trait]
impl ContactSource for HttpContactSource {
    #[instrument(skip(self, query), fields(field = %query.field), err)]
    async fn search_triggered(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<Candidate>, RemoteError> {
        let mut candidates = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut after: Option<String> = None;

        loop {
            let page = self.fetch_page(query, after.as_deref()).await?;
            candidates.extend(page.results.into_iter().map(ContactRecord::into_candidate));

            let next = page.paging.and_then(|paging| paging.next).map(|next| next.after);
            match next {
                Some(cursor) if !cursor.is_empty() => {
                    // A cursor that repeats would loop forever.
                    if !seen_cursors.insert(cursor.clone()) {
                        return Err(RemoteError::Decode(format!(
                            "contact search returned repeated cursor '{}'",
                            cursor
                        )));
                    }
                    after = Some(cursor);
                }
                _ => break,
            }
        }

        debug!(count = candidates.len(), "contact search complete");
        Ok(candidates)
    }
}
