use async_trait::async_trait;
use leadsync_model::Candidate;

use crate::remote::RemoteError;

/// Selects the records whose trigger attribute currently matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerQuery {
    pub field: String,
    pub value: String,
    /// Extra attributes to fetch alongside email and owner, e.g. the fields
    /// exclusion rules inspect.
    pub properties: Vec<String>,
}

impl TriggerQuery {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for property in properties {
            let property = property.into();
            if !self.properties.contains(&property) {
                self.properties.push(property);
            }
        }
        self
    }
}

/// Read-only view of the system of record.
#[async_trait]
pub trait ContactSource: Send + Sync {
    /// Returns every matching candidate, following pagination to the end.
    async fn search_triggered(
        &self,
        query: &TriggerQuery,
    ) -> Result<Vec<Candidate>, RemoteError>;
}
