use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of a provider-side enrichment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    /// Lenient mapping from provider status strings.
    ///
    /// Unknown values are treated as still pending so the poller keeps
    /// waiting until its budget runs out.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "done" | "completed" | "complete" | "success" | "succeeded" => {
                JobStatus::Done
            }
            "failed" | "error" | "errored" | "cancelled" | "canceled" => {
                JobStatus::Failed
            }
            "timeout" | "timed_out" | "expired" => JobStatus::Timeout,
            _ => JobStatus::Pending,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Snapshot of a job as returned by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnrichmentJob {
    pub id: String,
    pub status: JobStatus,
    /// Flattened result fields; only meaningful once `status` is `Done`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub data: BTreeMap<String, String>,
}

impl EnrichmentJob {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            data: BTreeMap::new(),
        }
    }
}

/// Submission parameters sent to the enrichment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnrichmentRequest {
    pub record_id: String,
    pub email: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub hints: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(JobStatus::parse("COMPLETED"), JobStatus::Done);
        assert_eq!(JobStatus::parse("error"), JobStatus::Failed);
        assert_eq!(JobStatus::parse("expired"), JobStatus::Timeout);
        assert_eq!(JobStatus::parse("queued"), JobStatus::Pending);
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
    }
}
