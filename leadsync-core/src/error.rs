use thiserror::Error;

use crate::ledger::LedgerError;
use crate::rate_limit::RateLimitError;
use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Raised before any candidate is processed; aborts the run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Candidate fetch failed after retries; nothing was processed.
    #[error("Contact source error: {0}")]
    Source(#[source] RemoteError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Errors that abort the whole run rather than a single candidate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Source(_))
    }
}

impl From<RateLimitError> for SyncError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled { .. } => SyncError::Cancelled,
            RateLimitError::InvalidConfig(msg) => SyncError::Config(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
