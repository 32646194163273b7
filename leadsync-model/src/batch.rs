use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why a candidate left the pipeline without a destination write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SkipReason {
    MissingEmail,
    UnknownOwner,
    NoDestination,
    AlreadyProcessed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingEmail => write!(f, "missing_email"),
            SkipReason::UnknownOwner => write!(f, "unknown_owner"),
            SkipReason::NoDestination => write!(f, "no_destination"),
            SkipReason::AlreadyProcessed => write!(f, "already_processed"),
        }
    }
}

/// Terminal state reached by one candidate in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "state", rename_all = "snake_case")
)]
pub enum CandidateOutcome {
    Excluded { rule: String },
    Skipped { reason: SkipReason },
    /// The destination already held the record; the ledger was updated but
    /// nothing was written remotely.
    MarkedDuplicate { destination: String },
    Succeeded { destination: String },
    Failed { error: String },
}

impl CandidateOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        CandidateOutcome::Skipped { reason }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CandidateOutcome::Excluded { .. } => "excluded",
            CandidateOutcome::Skipped {
                reason: SkipReason::AlreadyProcessed,
            } => "duplicate",
            CandidateOutcome::Skipped { .. } => "skipped",
            CandidateOutcome::MarkedDuplicate { .. } => "duplicate",
            CandidateOutcome::Succeeded { .. } => "succeeded",
            CandidateOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordError {
    pub record_id: String,
    pub error: String,
}

/// Aggregate summary of a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub excluded: u32,
    pub duplicate: u32,
    pub errors: Vec<RecordError>,
    /// Failures not kept in `errors` because the list hit its bound.
    pub errors_omitted: u32,
    pub cancelled: bool,
    #[cfg_attr(feature = "serde", serde(skip))]
    max_errors: usize,
}

impl BatchResult {
    pub fn begin(max_errors: usize) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            excluded: 0,
            duplicate: 0,
            errors: Vec::new(),
            errors_omitted: 0,
            cancelled: false,
            max_errors,
        }
    }

    /// Tallies one candidate's terminal state.
    pub fn record(&mut self, record_id: &str, outcome: &CandidateOutcome) {
        self.processed += 1;
        match outcome {
            CandidateOutcome::Excluded { .. } => self.excluded += 1,
            CandidateOutcome::Skipped {
                reason: SkipReason::AlreadyProcessed,
            }
            | CandidateOutcome::MarkedDuplicate { .. } => self.duplicate += 1,
            CandidateOutcome::Skipped { .. } => self.skipped += 1,
            CandidateOutcome::Succeeded { .. } => self.succeeded += 1,
            CandidateOutcome::Failed { error } => {
                self.failed += 1;
                if self.errors.len() < self.max_errors {
                    self.errors.push(RecordError {
                        record_id: record_id.to_string(),
                        error: error.clone(),
                    });
                } else {
                    self.errors_omitted += 1;
                }
            }
        }
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Seals the result; nothing should be recorded afterwards.
    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Returned instead of a batch when a run is already in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunSkipped {
    pub skipped: bool,
    pub reason: String,
}

impl RunSkipped {
    pub const ALREADY_RUNNING: &'static str = "already_running";

    pub fn already_running() -> Self {
        Self {
            skipped: true,
            reason: Self::ALREADY_RUNNING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum RunOutcome {
    Completed(BatchResult),
    Skipped(RunSkipped),
}

impl RunOutcome {
    pub fn batch(&self) -> Option<&BatchResult> {
        match self {
            RunOutcome::Completed(batch) => Some(batch),
            RunOutcome::Skipped(_) => None,
        }
    }

    pub fn into_batch(self) -> Option<BatchResult> {
        match self {
            RunOutcome::Completed(batch) => Some(batch),
            RunOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_follow_outcomes() {
        let mut batch = BatchResult::begin(10);
        batch.record("a", &CandidateOutcome::Excluded { rule: "x".into() });
        batch.record("b", &CandidateOutcome::skipped(SkipReason::MissingEmail));
        batch.record(
            "c",
            &CandidateOutcome::skipped(SkipReason::AlreadyProcessed),
        );
        batch.record(
            "d",
            &CandidateOutcome::MarkedDuplicate {
                destination: "camp".into(),
            },
        );
        batch.record(
            "e",
            &CandidateOutcome::Succeeded {
                destination: "camp".into(),
            },
        );
        batch.record("f", &CandidateOutcome::Failed { error: "boom".into() });

        assert_eq!(batch.processed, 6);
        assert_eq!(batch.excluded, 1);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.duplicate, 2);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(
            batch.errors,
            vec![RecordError {
                record_id: "f".into(),
                error: "boom".into()
            }]
        );
    }

    #[test]
    fn error_list_is_bounded() {
        let mut batch = BatchResult::begin(2);
        for id in ["a", "b", "c", "d"] {
            batch.record(id, &CandidateOutcome::Failed { error: "x".into() });
        }
        assert_eq!(batch.failed, 4);
        assert_eq!(batch.errors.len(), 2);
        assert_eq!(batch.errors_omitted, 2);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn skipped_run_serializes_flat() {
        let outcome = RunOutcome::Skipped(RunSkipped::already_running());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"skipped": true, "reason": "already_running"})
        );
    }
}
