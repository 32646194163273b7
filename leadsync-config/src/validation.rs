use leadsync_core::pipeline::LimitSettings;
use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{section}.{field} is required")]
    MissingSetting {
        section: &'static str,
        field: &'static str,
    },
    #[error("{section}.base_url is not a valid URL")]
    InvalidUrl {
        section: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{section}.base_url must use http or https, got '{scheme}'")]
    UnsupportedScheme {
        section: &'static str,
        scheme: String,
    },
    #[error("{section} rate limit needs a non-zero max_requests and window")]
    ZeroQuota { section: &'static str },
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("source.trigger_field must not be empty")]
    EmptyTriggerField,
    #[error("enrichment.poll_interval must be non-zero")]
    ZeroPollInterval,
    #[error("database.max_connections must be at least 1")]
    ZeroConnections,
    #[error("server.interval must be non-zero")]
    ZeroInterval,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    /// Emits every warning at `warn`, hint attached when present.
    pub fn log(&self) {
        for warning in &self.items {
            match &warning.hint {
                Some(hint) => tracing::warn!(hint = %hint, "{}", warning.message),
                None => tracing::warn!("{}", warning.message),
            }
        }
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.source.trigger.field.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyTriggerField);
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigGuardRailError::ZeroAttempts);
    }
    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::ZeroConnections);
    }
    if config.server.interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroInterval);
    }

    config.source.endpoint.http_endpoint("source")?;
    config.campaign.endpoint.http_endpoint("campaign")?;
    if is_zero(&config.campaign.limit) {
        return Err(ConfigGuardRailError::ZeroQuota {
            section: "campaign",
        });
    }

    if config.enrichment.enabled {
        config.enrichment.endpoint.http_endpoint("enrichment")?;
        if is_zero(&config.enrichment.limit) {
            return Err(ConfigGuardRailError::ZeroQuota {
                section: "enrichment",
            });
        }
        if config.enrichment.options.poll_interval.is_zero() {
            return Err(ConfigGuardRailError::ZeroPollInterval);
        }
        if config.enrichment.options.max_wait
            < config.enrichment.options.poll_interval
        {
            warnings.push(
                "enrichment.max_wait is shorter than poll_interval; most jobs will time out after one poll",
            );
        }
    } else {
        warnings.push_with_hint(
            "Enrichment disabled; leads are forwarded with CRM fields only",
            "Set [enrichment] enabled = true with base_url and api_key to enrich before adding",
        );
    }

    if config.pipeline.owners.is_empty() {
        warnings.push_with_hint(
            "No owners mapped; every candidate will be skipped as unknown_owner",
            "Add [pipeline.owners] entries; an empty destination routes to pipeline.default_destination",
        );
    } else if config.pipeline.default_destination.is_none()
        && config.pipeline.owners.values().any(Option::is_none)
    {
        warnings.push(
            "Some owners have no destination and no default_destination is set; their candidates will be skipped",
        );
    }

    if config.database.is_sqlite() {
        warnings.push_with_hint(
            "SQLite ledger in use; only one host can run the pipeline safely",
            "Point DATABASE_URL at PostgreSQL when running more than one replica",
        );
    }

    Ok(warnings)
}

fn is_zero(limit: &LimitSettings) -> bool {
    limit.max_requests == 0 || limit.window.is_zero()
}
