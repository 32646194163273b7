use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_model::{
    LedgerEntry, LedgerMetadata, LedgerStats, normalize_email,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{
    CREATE_INDEX_SQL, LedgerError, LedgerResult, LedgerStore, count,
    decode_metadata, encode_metadata, start_of_day,
};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processed_leads (
    record_id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    destination TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|e| LedgerError::Connect(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
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
        let hit: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM processed_leads WHERE record_id = $1 LIMIT 1",
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
        let hit: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM processed_leads WHERE email = $1 LIMIT 1",
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
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO processed_leads
                (record_id, email, owner_id, destination, metadata, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (record_id) DO UPDATE SET
                email = EXCLUDED.email,
                owner_id = EXCLUDED.owner_id,
                destination = EXCLUDED.destination,
                metadata = EXCLUDED.metadata,
                processed_at = EXCLUDED.processed_at
            "#,
        )
        .bind(record_id)
        .bind(normalize_email(&metadata.email))
        .bind(&metadata.owner_id)
        .bind(&metadata.destination)
        .bind(extra)
        .bind(now)
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
            WHERE record_id = $1
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
        let processed_at: DateTime<Utc> =
            row.try_get("processed_at").map_err(read)?;

        Ok(Some(LedgerEntry {
            record_id: row.try_get("record_id").map_err(read)?,
            email: row.try_get("email").map_err(read)?,
            owner_id: row.try_get("owner_id").map_err(read)?,
            destination: row.try_get("destination").map_err(read)?,
            metadata: decode_metadata(&metadata)?,
            processed_at,
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
            "SELECT COUNT(*) FROM processed_leads WHERE processed_at >= $1",
        )
        .bind(start_of_day(Utc::now()))
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
