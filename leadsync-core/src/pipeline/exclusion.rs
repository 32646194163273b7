use std::fmt;

use leadsync_model::Candidate;
use serde::{Deserialize, Serialize};

/// Pure predicate over candidate attributes, checked before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionRule {
    /// Attribute value is one of `values`, compared case-insensitively.
    AttributeIn { field: String, values: Vec<String> },
    /// Attribute holds a truthy flag (`true`, `yes`, `1`).
    FlagSet { field: String },
}

impl ExclusionRule {
    pub fn attribute_in<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExclusionRule::AttributeIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn flag_set(field: impl Into<String>) -> Self {
        ExclusionRule::FlagSet {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ExclusionRule::AttributeIn { field, .. }
            | ExclusionRule::FlagSet { field } => field,
        }
    }

    pub fn matches(&self, candidate: &Candidate) -> bool {
        let Some(value) = candidate.attribute(self.field()) else {
            return false;
        };
        let value = value.trim();
        match self {
            ExclusionRule::AttributeIn { values, .. } => values
                .iter()
                .any(|excluded| excluded.trim().eq_ignore_ascii_case(value)),
            ExclusionRule::FlagSet { .. } => is_truthy(value),
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionRule::AttributeIn { field, values } => {
                write!(f, "{} in [{}]", field, values.join(", "))
            }
            ExclusionRule::FlagSet { field } => write!(f, "{} is set", field),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "yes" | "1"
    )
}

/// First rule that excludes `candidate`, in configuration order.
pub fn first_match<'a>(
    rules: &'a [ExclusionRule],
    candidate: &Candidate,
) -> Option<&'a ExclusionRule> {
    rules.iter().find(|rule| rule.matches(candidate))
}
