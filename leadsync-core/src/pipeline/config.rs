use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::exclusion::ExclusionRule;
use crate::enrichment::EnrichmentOptions;
use crate::ports::TriggerQuery;
use crate::retry::RetryPolicy;
use crate::{Result, SyncError};

pub const DEFAULT_MAX_RECORDED_ERRORS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl LimitSettings {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub extra_fields: Vec<String>,
}

/// Everything a [`SyncPipeline`](super::SyncPipeline) needs besides its
/// collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub trigger: TriggerSettings,
    /// Owner id to destination. A `None` destination falls back to
    /// `default_destination`.
    pub owners: BTreeMap<String, Option<String>>,
    pub default_destination: Option<String>,
    pub exclusions: Vec<ExclusionRule>,
    pub retry: RetryPolicy,
    pub campaign_limit: LimitSettings,
    pub enrichment_limit: LimitSettings,
    /// `None` disables enrichment entirely.
    pub enrichment: Option<EnrichmentOptions>,
    pub max_recorded_errors: usize,
}

impl PipelineConfig {
    /// Minimal configuration: no owners, no exclusions, enrichment off.
    pub fn new(trigger_field: impl Into<String>, trigger_value: impl Into<String>) -> Self {
        Self {
            trigger: TriggerSettings {
                field: trigger_field.into(),
                value: trigger_value.into(),
                extra_fields: Vec::new(),
            },
            owners: BTreeMap::new(),
            default_destination: None,
            exclusions: Vec::new(),
            retry: RetryPolicy::default(),
            campaign_limit: LimitSettings::new(10, Duration::from_secs(1)),
            enrichment_limit: LimitSettings::new(5, Duration::from_secs(1)),
            enrichment: None,
            max_recorded_errors: DEFAULT_MAX_RECORDED_ERRORS,
        }
    }

    pub fn with_owner(
        mut self,
        owner_id: impl Into<String>,
        destination: Option<&str>,
    ) -> Self {
        self.owners
            .insert(owner_id.into(), destination.map(str::to_string));
        self
    }

    pub fn with_exclusion(mut self, rule: ExclusionRule) -> Self {
        self.exclusions.push(rule);
        self
    }

    /// Fields the source must return: the trigger extras plus every field an
    /// exclusion rule inspects.
    pub fn trigger_query(&self) -> TriggerQuery {
        TriggerQuery::new(&self.trigger.field, &self.trigger.value)
            .with_properties(self.trigger.extra_fields.iter().cloned())
            .with_properties(
                self.exclusions.iter().map(|rule| rule.field().to_string()),
            )
    }

    pub fn validate(&self) -> Result<()> {
        if self.trigger.field.trim().is_empty() {
            return Err(SyncError::Config(
                "trigger field must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, limit) in [
            ("campaign", &self.campaign_limit),
            ("enrichment", &self.enrichment_limit),
        ] {
            if limit.max_requests == 0 || limit.window.is_zero() {
                return Err(SyncError::Config(format!(
                    "{name} rate limit needs a non-zero quota and window"
                )));
            }
        }
        if let Some(options) = &self.enrichment
            && options.poll_interval.is_zero()
        {
            return Err(SyncError::Config(
                "enrichment.poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_query_includes_exclusion_fields_once() {
        let mut config = PipelineConfig::new("lead_status", "ready")
            .with_exclusion(ExclusionRule::flag_set("opted_out"))
            .with_exclusion(ExclusionRule::attribute_in("lifecycle_stage", ["customer"]));
        config.trigger.extra_fields = vec!["first_name".into(), "opted_out".into()];

        let query = config.trigger_query();
        assert_eq!(query.field, "lead_status");
        assert_eq!(
            query.properties,
            vec!["first_name", "opted_out", "lifecycle_stage"]
        );
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut config = PipelineConfig::new(" ", "x");
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        config.trigger.field = "lead_status".into();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry.max_attempts = 3;
        config.campaign_limit.max_requests = 0;
        assert!(config.validate().is_err());

        config.campaign_limit.max_requests = 1;
        assert!(config.validate().is_ok());
    }
}
