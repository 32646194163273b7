use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A source record selected because its trigger attribute matched.
///
/// Candidates are fetched fresh on every run and never written back to the
/// source. Enrichment produces a new value rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Candidate {
    /// Source-assigned, stable identifier.
    pub id: String,
    /// Identity key; compared case-insensitively.
    #[cfg_attr(feature = "serde", serde(default))]
    pub email: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub owner_id: Option<String>,
    /// Lifecycle/opt-out flags plus free-form context fields.
    #[cfg_attr(feature = "serde", serde(default))]
    pub attributes: BTreeMap<String, String>,
}

impl Candidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the attribute value when present and not blank.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Normalized email, or `None` when missing or blank.
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(normalize_email)
            .filter(|email| !email.is_empty())
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner_id
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
    }
}

/// Canonical form used for email identity comparisons.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Body handed to the campaign sink for a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LeadPayload {
    pub email: String,
    pub record_id: String,
    pub owner_id: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub fields: BTreeMap<String, String>,
}

impl LeadPayload {
    /// Builds the payload from a candidate whose email and owner were
    /// already validated by the caller.
    pub fn from_candidate(
        candidate: &Candidate,
        email: String,
        owner_id: String,
    ) -> Self {
        Self {
            email,
            record_id: candidate.id.clone(),
            owner_id,
            fields: candidate.attributes.clone(),
        }
    }
}
