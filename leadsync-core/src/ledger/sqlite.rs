use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use leadsync_model::{
    LedgerEntry, LedgerMetadata, LedgerStats, normalize_email,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::Row;
use tracing::debug;

use super::{
    CREATE_INDEX_SQL, LedgerError, LedgerResult, LedgerStore, count,
    decode_metadata, encode_metadata, start_of_day,
};

// processed_at is stored as fixed-width RFC 3339 text so that string
// comparison matches chronological order.
const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_leads (
    record_id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    destination TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    processed_at TEXT NOT NULL
)
"#;

/// File-backed ledger for single-host deployments and tests.
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> LedgerResult<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LedgerError::Connect(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens a distinct database, so the
        // pool must hold exactly one connection and never recycle it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Connect(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Private in-memory ledger with its schema in place.
    pub async fn in_memory() -> LedgerResult<Self> {
        let ledger = Self::connect("sqlite::memory:", 1).await?;
        ledger.ensure_schema().await?;
        Ok(ledger)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_text(raw: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| {
            LedgerError::Query(format!("Malformed processed_at '{}': {}", raw, e))
        })
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::query(CREATE_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::Query(format!("Failed to create ledger table: {}", e))
            })?;
        sqlx::query(CREATE_INDEX_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::Query(format!("Failed to create email index: {}", e))
            })?;
        Ok(())
    }

    async fn is_processed(&self, record_id: &str) -> LedgerResult<bool> {
        let hit: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM processed_leads WHERE record_id = ? LIMIT 1",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::Query(format!("Failed to look up record id: {}", e))
        })?;
        Ok(hit.is_some())
    }

    async fn is_email_processed(&self, email: &str) -> LedgerResult<bool> {
        let hit: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM processed_leads WHERE email = ? LIMIT 1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::Query(format!("Failed to look up email: {}", e))
        })?;
        Ok(hit.is_some())
    }

    async fn mark_processed(
        &self,
        record_id: &str,
        metadata: &LedgerMetadata,
    ) -> LedgerResult<()> {
        let extra = encode_metadata(&metadata.extra)?;

        sqlx::query(
            r#"
            INSERT INTO processed_leads
                (record_id, email, owner_id, destination, metadata, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (record_id) DO UPDATE SET
                email = excluded.email,
                owner_id = excluded.owner_id,
                destination = excluded.destination,
                metadata = excluded.metadata,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(record_id)
        .bind(normalize_email(&metadata.email))
        .bind(&metadata.owner_id)
        .bind(&metadata.destination)
        .bind(extra)
        .bind(to_text(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::Query(format!("Failed to mark record processed: {}", e))
        })?;

        debug!(record_id, destination = %metadata.destination, "ledger entry written");
        Ok(())
    }

    async fn entry(&self, record_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT record_id, email, owner_id, destination, metadata, processed_at
            FROM processed_leads
            WHERE record_id = ?
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::Query(format!("Failed to load ledger entry: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let read = |e: sqlx::Error| {
            LedgerError::Query(format!("Malformed ledger row: {}", e))
        };
        let metadata: String = row.try_get("metadata").map_err(read)?;
        let processed_at: String = row.try_get("processed_at").map_err(read)?;

        Ok(Some(LedgerEntry {
            record_id: row.try_get("record_id").map_err(read)?,
            email: row.try_get("email").map_err(read)?,
            owner_id: row.try_get("owner_id").map_err(read)?,
            destination: row.try_get("destination").map_err(read)?,
            metadata: decode_metadata(&metadata)?,
            processed_at: from_text(&processed_at)?,
        }))
    }

    async fn stats(&self) -> LedgerResult<LedgerStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_leads")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                LedgerError::Query(format!("Failed to count ledger: {}", e))
            })?;

        let owners: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT owner_id, COUNT(*)
            FROM processed_leads
            GROUP BY owner_id
            ORDER BY owner_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::Query(format!("Failed to count ledger by owner: {}", e))
        })?;

        let today: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processed_leads WHERE processed_at >= ?",
        )
        .bind(to_text(start_of_day(Utc::now())))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            LedgerError::Query(format!("Failed to count today's entries: {}", e))
        })?;

        Ok(LedgerStats {
            total: count(total),
            by_owner: owners
                .into_iter()
                .map(|(owner, n)| (owner, count(n)))
                .collect::<BTreeMap<_, _>>(),
            today: count(today),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        assert!(to_text(early) < to_text(late));
        assert_eq!(from_text(&to_text(late)).unwrap(), late);
    }
}
