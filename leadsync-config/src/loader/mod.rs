pub mod error;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use leadsync_core::enrichment::EnrichmentOptions;
use leadsync_core::infrastructure::http::{ApiKey, HttpEndpoint};
use leadsync_core::pipeline::config::DEFAULT_MAX_RECORDED_ERRORS;
use leadsync_core::pipeline::{LimitSettings, TriggerSettings};
use leadsync_core::retry::RetryPolicy;
use once_cell::sync::Lazy;

use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{
    CampaignConfig, Config, ConfigMetadata, DatabaseConfig, EndpointConfig,
    EnrichmentConfig, PipelineSettings, ServerConfig, SourceConfig,
};
use crate::validation::{self, ConfigWarnings};

pub use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("leadsync.toml"),
        PathBuf::from("config/leadsync.toml"),
    ]
});

const DEFAULT_DATABASE_URL: &str = "sqlite://leadsync.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_CAMPAIGN_LIMIT: LimitSettings =
    LimitSettings::new(10, Duration::from_secs(1));
const DEFAULT_ENRICHMENT_LIMIT: LimitSettings =
    LimitSettings::new(5, Duration::from_secs(1));

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, then the process environment, then the TOML file.
    /// Environment values win over file values.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Composes configuration from an already gathered environment layer.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            compose_config(file_config, env, config_path, env_file_loaded)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path)
        {
            (Some(path), _) | (None, Some(path)) => (Some(path.clone()), true),
            (None, None) => (
                DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .find(|candidate| candidate.exists())
                    .cloned(),
                false,
            ),
        };

        let Some(path) = path else {
            return Ok((None, None));
        };
        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|err| {
            ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            }
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config_path.is_none() {
        warnings.push_with_hint(
            "No leadsync.toml detected; falling back to environment variables",
            "Create leadsync.toml or point LEADSYNC_CONFIG at one",
        );
    }

    let FileConfig {
        database: file_database,
        source: file_source,
        campaign: file_campaign,
        enrichment: file_enrichment,
        retry: file_retry,
        pipeline: file_pipeline,
        server: file_server,
    } = file_config.unwrap_or_default();

    let database = DatabaseConfig {
        url: env
            .database_url
            .or(file_database.url)
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS),
    };

    let source = SourceConfig {
        endpoint: EndpointConfig {
            base_url: env.source_base_url.or(file_source.base_url),
            api_key: env.source_api_key.or(file_source.api_key).map(ApiKey::new),
            timeout: duration_or(
                "source.timeout",
                None,
                file_source.timeout,
                HttpEndpoint::DEFAULT_TIMEOUT,
            )?,
        },
        trigger: TriggerSettings {
            field: env
                .trigger_field
                .or(file_source.trigger_field)
                .unwrap_or_default(),
            value: env
                .trigger_value
                .or(file_source.trigger_value)
                .unwrap_or_default(),
            extra_fields: env
                .extra_fields
                .or(file_source.extra_fields)
                .unwrap_or_default(),
        },
    };

    let campaign = CampaignConfig {
        endpoint: EndpointConfig {
            base_url: env.campaign_base_url.or(file_campaign.base_url),
            api_key: env
                .campaign_api_key
                .or(file_campaign.api_key)
                .map(ApiKey::new),
            timeout: duration_or(
                "campaign.timeout",
                None,
                file_campaign.timeout,
                HttpEndpoint::DEFAULT_TIMEOUT,
            )?,
        },
        limit: LimitSettings {
            max_requests: env
                .campaign_max_requests
                .or(file_campaign.max_requests)
                .unwrap_or(DEFAULT_CAMPAIGN_LIMIT.max_requests),
            window: duration_or(
                "campaign.window",
                env.campaign_window,
                file_campaign.window,
                DEFAULT_CAMPAIGN_LIMIT.window,
            )?,
        },
    };

    let enrichment_defaults = EnrichmentOptions::default();
    let enrichment = EnrichmentConfig {
        enabled: env
            .enrichment_enabled
            .or(file_enrichment.enabled)
            .unwrap_or(false),
        endpoint: EndpointConfig {
            base_url: env.enrichment_base_url.or(file_enrichment.base_url),
            api_key: env
                .enrichment_api_key
                .or(file_enrichment.api_key)
                .map(ApiKey::new),
            timeout: duration_or(
                "enrichment.timeout",
                None,
                file_enrichment.timeout,
                HttpEndpoint::DEFAULT_TIMEOUT,
            )?,
        },
        limit: LimitSettings {
            max_requests: file_enrichment
                .max_requests
                .unwrap_or(DEFAULT_ENRICHMENT_LIMIT.max_requests),
            window: duration_or(
                "enrichment.window",
                None,
                file_enrichment.window,
                DEFAULT_ENRICHMENT_LIMIT.window,
            )?,
        },
        options: EnrichmentOptions {
            max_wait: duration_or(
                "enrichment.max_wait",
                env.enrichment_max_wait,
                file_enrichment.max_wait,
                enrichment_defaults.max_wait,
            )?,
            poll_interval: duration_or(
                "enrichment.poll_interval",
                None,
                file_enrichment.poll_interval,
                enrichment_defaults.poll_interval,
            )?,
        },
    };

    let retry_defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_attempts: env
            .retry_max_attempts
            .or(file_retry.max_attempts)
            .unwrap_or(retry_defaults.max_attempts),
        backoff_base_ms: millis_or(
            "retry.base_delay",
            file_retry.base_delay,
            retry_defaults.backoff_base_ms,
        )?,
        backoff_max_ms: millis_or(
            "retry.max_delay",
            file_retry.max_delay,
            retry_defaults.backoff_max_ms,
        )?,
        jitter_ratio: file_retry
            .jitter_ratio
            .map(|ratio| ratio.clamp(0.0, 1.0))
            .unwrap_or(retry_defaults.jitter_ratio),
    };

    let pipeline = PipelineSettings {
        default_destination: env
            .default_destination
            .or(file_pipeline.default_destination)
            .filter(|dest| !dest.trim().is_empty()),
        max_recorded_errors: file_pipeline
            .max_recorded_errors
            .unwrap_or(DEFAULT_MAX_RECORDED_ERRORS),
        owners: file_pipeline
            .owners
            .into_iter()
            .map(|(owner, dest)| {
                let dest = Some(dest.trim().to_string()).filter(|d| !d.is_empty());
                (owner, dest)
            })
            .collect(),
        exclusions: file_pipeline.exclusions,
    };

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(DEFAULT_SERVER_PORT),
        interval: duration_or(
            "server.interval",
            env.sync_interval,
            file_server.interval,
            DEFAULT_SYNC_INTERVAL,
        )?,
    };

    let config = Config {
        database,
        source,
        campaign,
        enrichment,
        retry,
        pipeline,
        server,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    let guard_warnings = validation::apply_guard_rails(&config)?;
    warnings.extend(guard_warnings);

    Ok((config, warnings))
}

/// Environment value, else file value, else `default`; both parsed with
/// `humantime` (`"500ms"`, `"10s"`, `"2m 30s"`).
fn duration_or(
    field: &'static str,
    env: Option<String>,
    file: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match env.or(file) {
        Some(raw) => humantime::parse_duration(raw.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value: raw,
                source,
            }
        }),
        None => Ok(default),
    }
}

fn millis_or(
    field: &'static str,
    file: Option<String>,
    default_ms: u64,
) -> Result<u64, ConfigLoadError> {
    let Some(raw) = file else {
        return Ok(default_ms);
    };
    let duration = duration_or(field, None, Some(raw.clone()), Duration::ZERO)?;
    u64::try_from(duration.as_millis())
        .map_err(|_| ConfigLoadError::DurationOverflow { field, value: raw })
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
