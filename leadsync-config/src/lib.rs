//! Configuration for leadsync.
//!
//! Settings come from three layers: a `.env` file, the process
//! environment and a TOML file (`leadsync.toml`). Environment values win.
//! After composition the guard rails reject settings the pipeline cannot
//! run with and collect warnings for the ones it can run with but
//! probably should not.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    CampaignConfig, Config, ConfigMetadata, DatabaseConfig, EndpointConfig,
    EnrichmentConfig, PipelineSettings, ServerConfig, SourceConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
