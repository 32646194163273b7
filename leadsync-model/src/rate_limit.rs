use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Point-in-time view of a sliding window limiter, for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LimiterStatus {
    pub name: String,
    /// Slots that could be admitted right now.
    pub available: u32,
    pub max: u32,
    /// Time until the next slot frees up; zero when `available > 0`.
    pub wait: Duration,
}

impl LimiterStatus {
    pub fn is_saturated(&self) -> bool {
        self.available == 0
    }
}
