//! Failure taxonomy for calls to remote collaborators.

use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::retry::Retryable;

/// HTTP statuses that signal a transient condition on the remote side.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkKind {
    ConnectionReset,
    ConnectionRefused,
    Timeout,
    Dns,
    Other,
}

impl NetworkKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, NetworkKind::Other)
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkKind::ConnectionReset => write!(f, "connection reset"),
            NetworkKind::ConnectionRefused => write!(f, "connection refused"),
            NetworkKind::Timeout => write!(f, "timeout"),
            NetworkKind::Dns => write!(f, "dns failure"),
            NetworkKind::Other => write!(f, "network"),
        }
    }
}

/// Server-supplied hint for when a request may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    After(Duration),
    At(DateTime<Utc>),
}

impl RetryHint {
    /// Delay to honor relative to `now`; hints in the past collapse to zero.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            RetryHint::After(delay) => *delay,
            RetryHint::At(when) => {
                (*when - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }

    /// Parses a `Retry-After` header: delta-seconds or an HTTP-date.
    pub fn parse_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(secs) = value.parse::<u64>() {
            return Some(RetryHint::After(Duration::from_secs(secs)));
        }
        httpdate::parse_http_date(value)
            .ok()
            .map(|when: SystemTime| RetryHint::At(DateTime::<Utc>::from(when)))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error ({kind}): {message}")]
    Network { kind: NetworkKind, message: String },

    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<RetryHint>,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    pub fn network(kind: NetworkKind, message: impl Into<String>) -> Self {
        RemoteError::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(self, hint: RetryHint) -> Self {
        match self {
            RemoteError::Status {
                status, message, ..
            } => RemoteError::Status {
                status,
                message,
                retry_after: Some(hint),
            },
            other => other,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network { kind, .. } => kind.is_transient(),
            RemoteError::Status { status, .. } => {
                RETRYABLE_STATUSES.contains(status)
            }
            RemoteError::Decode(_) | RemoteError::InvalidRequest(_) => false,
        }
    }

    fn retry_hint(&self) -> Option<RetryHint> {
        match self {
            RemoteError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
