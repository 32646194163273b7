//! Durable idempotency ledger.
//!
//! The ledger is the authoritative record of which source records have
//! reached a terminal "written" or "marked duplicate" state. It is keyed by
//! record id and also answers email lookups so the same person reached
//! through two record ids is only pushed once.

mod postgres;
mod sqlite;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_model::{LedgerEntry, LedgerMetadata, LedgerStats};
use thiserror::Error;
use tracing::info;

pub use postgres::PostgresLedger;
pub use sqlite::SqliteLedger;

pub(crate) const CREATE_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_processed_leads_email ON processed_leads (email)";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to connect to ledger: {0}")]
    Connect(String),

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("Ledger metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Unsupported ledger URL '{0}': expected postgres:// or sqlite:")]
    UnsupportedUrl(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the table and email index when missing; safe to repeat.
    async fn ensure_schema(&self) -> LedgerResult<()>;

    async fn is_processed(&self, record_id: &str) -> LedgerResult<bool>;

    /// Case-insensitive; `email` is normalized before the lookup.
    async fn is_email_processed(&self, email: &str) -> LedgerResult<bool>;

    /// Upserts the entry for `record_id`; repeating the call converges on
    /// one row carrying the latest metadata.
    async fn mark_processed(
        &self,
        record_id: &str,
        metadata: &LedgerMetadata,
    ) -> LedgerResult<()>;

    async fn entry(&self, record_id: &str) -> LedgerResult<Option<LedgerEntry>>;

    async fn stats(&self) -> LedgerResult<LedgerStats>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Sqlite,
}

impl LedgerBackend {
    pub fn from_url(url: &str) -> LedgerResult<Self> {
        let url = url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(LedgerBackend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(LedgerBackend::Sqlite)
        } else {
            Err(LedgerError::UnsupportedUrl(url.to_string()))
        }
    }
}

/// Opens the backend named by `url` and bootstraps its schema.
pub async fn connect(
    url: &str,
    max_connections: u32,
) -> LedgerResult<Arc<dyn LedgerStore>> {
    let backend = LedgerBackend::from_url(url)?;
    let ledger: Arc<dyn LedgerStore> = match backend {
        LedgerBackend::Postgres => {
            Arc::new(PostgresLedger::connect(url, max_connections).await?)
        }
        LedgerBackend::Sqlite => {
            Arc::new(SqliteLedger::connect(url, max_connections).await?)
        }
    };
    ledger.ensure_schema().await?;
    info!(?backend, "ledger ready");
    Ok(ledger)
}

pub(crate) fn encode_metadata(
    extra: &BTreeMap<String, String>,
) -> LedgerResult<String> {
    Ok(serde_json::to_string(extra)?)
}

pub(crate) fn decode_metadata(
    raw: &str,
) -> LedgerResult<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

pub(crate) fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backend_follows_url_scheme() {
        assert_eq!(
            LedgerBackend::from_url("postgres://u@localhost/leads").unwrap(),
            LedgerBackend::Postgres
        );
        assert_eq!(
            LedgerBackend::from_url("postgresql://localhost/leads").unwrap(),
            LedgerBackend::Postgres
        );
        assert_eq!(
            LedgerBackend::from_url("sqlite://ledger.db").unwrap(),
            LedgerBackend::Sqlite
        );
        assert!(matches!(
            LedgerBackend::from_url("mysql://localhost/leads"),
            Err(LedgerError::UnsupportedUrl(_))
        ));
    }

    #[test]
    fn start_of_day_truncates_to_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn blank_metadata_decodes_empty() {
        assert!(decode_metadata("").unwrap().is_empty());
        let mut extra = BTreeMap::new();
        extra.insert("reason".to_string(), "remote_exists".to_string());
        let raw = encode_metadata(&extra).unwrap();
        assert_eq!(decode_metadata(&raw).unwrap(), extra);
        assert!(decode_metadata("{not json").is_err());
    }
}
