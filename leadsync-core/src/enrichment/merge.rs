//! Field-level merge of provider data into a candidate.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use leadsync_model::Candidate;

pub const ENRICHED_FLAG: &str = "enriched";
pub const ENRICHED_AT: &str = "enriched_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Only populate the field when the candidate has no usable value.
    FillIfAbsent,
    /// Provider-discovered contact points; always applied.
    AlwaysOverwrite,
}

/// Fields with an explicit strategy. Anything else is `FillIfAbsent`.
pub const MERGE_RULES: &[(&str, MergeStrategy)] = &[
    ("first_name", MergeStrategy::FillIfAbsent),
    ("last_name", MergeStrategy::FillIfAbsent),
    ("company", MergeStrategy::FillIfAbsent),
    ("job_title", MergeStrategy::FillIfAbsent),
    ("phone", MergeStrategy::AlwaysOverwrite),
    ("mobile_phone", MergeStrategy::AlwaysOverwrite),
    ("linkedin_url", MergeStrategy::AlwaysOverwrite),
];

/// Keys the provider can never write.
const PROTECTED: &[&str] = &["email", ENRICHED_FLAG, ENRICHED_AT];

/// `None` for protected keys.
pub fn strategy_for(field: &str) -> Option<MergeStrategy> {
    if PROTECTED.contains(&field) {
        return None;
    }
    Some(
        MERGE_RULES
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, strategy)| *strategy)
            .unwrap_or(MergeStrategy::FillIfAbsent),
    )
}

/// Returns a new candidate with `data` applied and the enrichment marker
/// set. Blank provider values are ignored.
pub fn merge_enrichment(
    candidate: &Candidate,
    data: &BTreeMap<String, String>,
    at: DateTime<Utc>,
) -> Candidate {
    let mut merged = candidate.clone();

    for (field, value) in data {
        if value.trim().is_empty() {
            continue;
        }
        let apply = match strategy_for(field) {
            None => false,
            Some(MergeStrategy::AlwaysOverwrite) => true,
            Some(MergeStrategy::FillIfAbsent) => merged.attribute(field).is_none(),
        };
        if apply {
            merged.attributes.insert(field.clone(), value.clone());
        }
    }

    merged
        .attributes
        .insert(ENRICHED_FLAG.to_string(), "true".to_string());
    merged.attributes.insert(
        ENRICHED_AT.to_string(),
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    merged
}
