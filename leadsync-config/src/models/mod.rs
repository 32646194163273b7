pub mod sources;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use leadsync_core::enrichment::EnrichmentOptions;
use leadsync_core::infrastructure::http::{ApiKey, HttpEndpoint};
use leadsync_core::pipeline::{
    ExclusionRule, LimitSettings, PipelineConfig, TriggerSettings,
};
use leadsync_core::retry::RetryPolicy;
use url::Url;

use crate::validation::ConfigGuardRailError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub campaign: CampaignConfig,
    pub enrichment: EnrichmentConfig,
    pub retry: RetryPolicy,
    pub pipeline: PipelineSettings,
    pub server: ServerConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Projects the loaded settings onto what the orchestrator consumes.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            trigger: self.source.trigger.clone(),
            owners: self.pipeline.owners.clone(),
            default_destination: self.pipeline.default_destination.clone(),
            exclusions: self.pipeline.exclusions.clone(),
            retry: self.retry,
            campaign_limit: self.campaign.limit,
            enrichment_limit: self.enrichment.limit,
            enrichment: self.enrichment.enabled.then_some(self.enrichment.options),
            max_recorded_errors: self.pipeline.max_recorded_errors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_sqlite(&self) -> bool {
        self.url.trim_start().starts_with("sqlite:")
    }
}

/// Base URL and credential of one remote API.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: Option<String>,
    pub api_key: Option<ApiKey>,
    pub timeout: Duration,
}

impl EndpointConfig {
    /// Resolves a usable endpoint, naming `section` in the error when the
    /// URL or key is missing or the URL does not parse.
    pub fn http_endpoint(
        &self,
        section: &'static str,
    ) -> Result<HttpEndpoint, ConfigGuardRailError> {
        let raw = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(ConfigGuardRailError::MissingSetting {
                section,
                field: "base_url",
            })?;
        let base_url =
            Url::parse(raw).map_err(|source| ConfigGuardRailError::InvalidUrl {
                section,
                source,
            })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigGuardRailError::UnsupportedScheme {
                section,
                scheme: base_url.scheme().to_string(),
            });
        }
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigGuardRailError::MissingSetting {
                section,
                field: "api_key",
            })?;

        Ok(HttpEndpoint::new(base_url, api_key).with_timeout(self.timeout))
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub endpoint: EndpointConfig,
    pub trigger: TriggerSettings,
}

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub endpoint: EndpointConfig,
    pub limit: LimitSettings,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub endpoint: EndpointConfig,
    pub limit: LimitSettings,
    pub options: EnrichmentOptions,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_destination: Option<String>,
    pub max_recorded_errors: usize,
    pub owners: BTreeMap<String, Option<String>>,
    pub exclusions: Vec<ExclusionRule>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Pause between scheduled batches in `serve`.
    pub interval: Duration,
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
