//! JSON-over-HTTP adapters for the collaborator ports.
//!
//! All three adapters share one shape: a base URL, a bearer API key and a
//! `reqwest::Client` with a request timeout. Transport failures and non-2xx
//! statuses are folded into [`RemoteError`] so the retry executor can
//! classify them.

mod campaign;
mod contacts;
mod enrichment;

use std::fmt;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::remote::{NetworkKind, RemoteError, RetryHint};

pub use campaign::HttpCampaignSink;
pub use contacts::HttpContactSource;
pub use enrichment::HttpEnrichmentProvider;

const MAX_ERROR_BODY: usize = 512;

/// Bearer credential; wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Clone, Debug)]
pub struct HttpEndpoint {
    base_url: Url,
    api_key: ApiKey,
    timeout: Duration,
}

impl HttpEndpoint {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn new(base_url: Url, api_key: ApiKey) -> Self {
        Self {
            base_url,
            api_key,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn parse(base_url: &str, api_key: ApiKey) -> Result<Self, RemoteError> {
        let url = Url::parse(base_url).map_err(|e| {
            RemoteError::InvalidRequest(format!("invalid base URL '{}': {}", base_url, e))
        })?;
        Ok(Self::new(url, api_key))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub(crate) fn client(&self) -> Result<Client, RemoteError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                RemoteError::InvalidRequest(format!("failed to build HTTP client: {}", e))
            })
    }

    /// Appends percent-encoded path segments to the base URL.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::InvalidRequest(format!(
                    "base URL '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_decode() {
            return RemoteError::Decode(message);
        }
        if err.is_builder() {
            return RemoteError::InvalidRequest(message);
        }

        let kind = if err.is_timeout() {
            NetworkKind::Timeout
        } else if err.is_connect() {
            if mentions_dns(&err) {
                NetworkKind::Dns
            } else {
                NetworkKind::ConnectionRefused
            }
        } else if err.is_request() || err.is_body() {
            NetworkKind::ConnectionReset
        } else {
            NetworkKind::Other
        };
        RemoteError::Network { kind, message }
    }
}

fn mentions_dns(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") || text.contains("lookup") {
            return true;
        }
        current = cause.source();
    }
    false
}

/// Passes 2xx responses through; anything else becomes a status error
/// carrying a truncated body and any `Retry-After` hint.
pub(crate) async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(RetryHint::parse_header);

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    if message.trim().is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string();
    }

    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
        retry_after,
    })
}

/// Reads a JSON body, treating an empty body as `T::default()`.
pub(crate) async fn json_or_default<T>(response: Response) -> Result<T, RemoteError>
where
    T: serde::de::DeserializeOwned + Default,
{
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Flattens a JSON property into the string form candidates carry.
pub(crate) fn flatten_value(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("sk-live-123");
        assert_eq!(format!("{key:?}"), "ApiKey(<redacted>)");
        assert_eq!(key.expose(), "sk-live-123");
        assert!(ApiKey::new("  ").is_empty());
    }

    #[test]
    fn url_segments_are_encoded() {
        let endpoint =
            HttpEndpoint::parse("https://api.example.com/v1/", ApiKey::new("k")).unwrap();
        let url = endpoint.url(&["campaigns", "spring promo", "leads"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/campaigns/spring%20promo/leads"
        );

        let bare = HttpEndpoint::parse("https://api.example.com", ApiKey::new("k")).unwrap();
        assert_eq!(
            bare.url(&["enrichments"]).unwrap().as_str(),
            "https://api.example.com/enrichments"
        );
    }

    #[test]
    fn flattens_scalar_properties() {
        assert_eq!(flatten_value(serde_json::json!(null)), None);
        assert_eq!(flatten_value(serde_json::json!("x")).as_deref(), Some("x"));
        assert_eq!(flatten_value(serde_json::json!(true)).as_deref(), Some("true"));
        assert_eq!(flatten_value(serde_json::json!(42)).as_deref(), Some("42"));
    }
}
