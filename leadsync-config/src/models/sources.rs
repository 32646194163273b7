use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use leadsync_core::pipeline::ExclusionRule;
use serde::{Deserialize, Serialize};

/// Raw configuration as defined in a TOML file.
///
/// Durations stay as strings here and are parsed with `humantime` during
/// composition so a bad value can name its field.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub source: FileSourceConfig,
    #[serde(default)]
    pub campaign: FileCampaignConfig,
    #[serde(default)]
    pub enrichment: FileEnrichmentConfig,
    #[serde(default)]
    pub retry: FileRetryConfig,
    #[serde(default)]
    pub pipeline: FilePipelineConfig,
    #[serde(default)]
    pub server: FileServerConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSourceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_fields: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCampaignConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileEnrichmentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ratio: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePipelineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_recorded_errors: Option<usize>,
    /// Owner id to destination; an empty destination routes to
    /// `default_destination`.
    #[serde(default)]
    pub owners: BTreeMap<String, String>,
    #[serde(default)]
    pub exclusions: Vec<ExclusionRule>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub source_base_url: Option<String>,
    pub source_api_key: Option<String>,
    pub trigger_field: Option<String>,
    pub trigger_value: Option<String>,
    pub extra_fields: Option<Vec<String>>,
    pub campaign_base_url: Option<String>,
    pub campaign_api_key: Option<String>,
    pub campaign_max_requests: Option<u32>,
    pub campaign_window: Option<String>,
    pub enrichment_enabled: Option<bool>,
    pub enrichment_base_url: Option<String>,
    pub enrichment_api_key: Option<String>,
    pub enrichment_max_wait: Option<String>,
    pub retry_max_attempts: Option<u32>,
    pub default_destination: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub sync_interval: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the environment layer from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        EnvConfig {
            config_path: var("LEADSYNC_CONFIG").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            database_max_connections: parse_value(var("DATABASE_MAX_CONNECTIONS")),
            source_base_url: var("LEADSYNC_SOURCE_URL"),
            source_api_key: var("LEADSYNC_SOURCE_API_KEY"),
            trigger_field: var("LEADSYNC_TRIGGER_FIELD"),
            trigger_value: var("LEADSYNC_TRIGGER_VALUE"),
            extra_fields: var("LEADSYNC_EXTRA_FIELDS").map(|raw| parse_csv(&raw)),
            campaign_base_url: var("LEADSYNC_CAMPAIGN_URL"),
            campaign_api_key: var("LEADSYNC_CAMPAIGN_API_KEY"),
            campaign_max_requests: parse_value(var("LEADSYNC_CAMPAIGN_MAX_REQUESTS")),
            campaign_window: var("LEADSYNC_CAMPAIGN_WINDOW"),
            enrichment_enabled: var("LEADSYNC_ENRICHMENT_ENABLED")
                .and_then(|raw| parse_bool(&raw)),
            enrichment_base_url: var("LEADSYNC_ENRICHMENT_URL"),
            enrichment_api_key: var("LEADSYNC_ENRICHMENT_API_KEY"),
            enrichment_max_wait: var("LEADSYNC_ENRICHMENT_MAX_WAIT"),
            retry_max_attempts: parse_value(var("LEADSYNC_RETRY_MAX_ATTEMPTS")),
            default_destination: var("LEADSYNC_DEFAULT_DESTINATION"),
            server_host: var("SERVER_HOST"),
            server_port: parse_value(var("SERVER_PORT")),
            sync_interval: var("LEADSYNC_SYNC_INTERVAL"),
        }
    }
}

fn parse_value<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|raw| raw.trim().parse().ok())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn blank_and_malformed_values_are_ignored() {
        let config = env(&[
            ("DATABASE_URL", "   "),
            ("SERVER_PORT", "not-a-port"),
            ("LEADSYNC_ENRICHMENT_ENABLED", "maybe"),
        ]);
        assert_eq!(config.database_url, None);
        assert_eq!(config.server_port, None);
        assert_eq!(config.enrichment_enabled, None);
    }

    #[test]
    fn lists_and_flags_are_parsed() {
        let config = env(&[
            ("LEADSYNC_EXTRA_FIELDS", "first_name, ,company"),
            ("LEADSYNC_ENRICHMENT_ENABLED", "Off"),
            ("LEADSYNC_CAMPAIGN_MAX_REQUESTS", " 25 "),
        ]);
        assert_eq!(
            config.extra_fields,
            Some(vec!["first_name".to_string(), "company".to_string()])
        );
        assert_eq!(config.enrichment_enabled, Some(false));
        assert_eq!(config.campaign_max_requests, Some(25));
    }

    #[test]
    fn file_sections_default_when_absent() {
        let file: FileConfig = toml::from_str(
            r#"
            [pipeline]
            owners = { "owner-1" = "spring", "owner-2" = "" }

            [[pipeline.exclusions]]
            kind = "flag_set"
            field = "opted_out"
            "#,
        )
        .unwrap();

        assert!(file.database.url.is_none());
        assert_eq!(file.pipeline.owners.len(), 2);
        assert_eq!(
            file.pipeline.exclusions,
            vec![ExclusionRule::flag_set("opted_out")]
        );
    }
}
