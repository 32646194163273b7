use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Idempotency record for one source record.
///
/// `record_id` is unique in the ledger; `email` is indexed but not unique
/// since re-imports can map several ids onto the same person.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LedgerEntry {
    pub record_id: String,
    /// Stored normalized.
    pub email: String,
    pub owner_id: String,
    pub destination: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub metadata: BTreeMap<String, String>,
    pub processed_at: DateTime<Utc>,
}

/// Everything the orchestrator records alongside a processed record id.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LedgerMetadata {
    pub email: String,
    pub owner_id: String,
    pub destination: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub extra: BTreeMap<String, String>,
}

impl LedgerMetadata {
    pub fn new(
        email: impl Into<String>,
        owner_id: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            owner_id: owner_id.into(),
            destination: destination.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Aggregate view over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LedgerStats {
    pub total: u64,
    pub by_owner: BTreeMap<String, u64>,
    /// Entries processed since UTC midnight.
    pub today: u64,
}
